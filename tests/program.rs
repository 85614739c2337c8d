//! End-to-end program tests: build shaders, run dispatches, observe
//! outputs.

#![cfg(target_arch = "x86_64")]

use prism::{builtin, create_program, BindingTable, Program, ProgramError};
use prism_glsl::{
    AggregateOp, Arena, BasicType, BinaryOp, ConstantValue, Node, NodeId, NodeKind, Qualifier,
    ShaderObject, Type,
};
use prism_shader::{
    DestinationParameter, Instruction, Opcode, ParameterType, Shader, ShaderType, SourceParameter,
};

fn ins(op: Opcode) -> Instruction {
    Instruction::new(op)
}

fn reg(ty: ParameterType, index: u32) -> SourceParameter {
    SourceParameter {
        ty,
        index,
        ..SourceParameter::default()
    }
}

fn lit(value: [f32; 4]) -> SourceParameter {
    SourceParameter {
        ty: ParameterType::FloatLiteral,
        value,
        ..SourceParameter::default()
    }
}

fn dst(ty: ParameterType, index: u32) -> DestinationParameter {
    DestinationParameter {
        ty,
        index,
        ..DestinationParameter::default()
    }
}

fn shader_with(instructions: Vec<Instruction>) -> Shader {
    let mut shader = Shader::new(ShaderType::Pixel, 0x0300);
    for instruction in instructions {
        shader.append(instruction);
    }
    shader.analyze();
    shader
}

#[test]
fn global_invocation_ids_cover_the_grid() {
    // o0 = global_invocation_id.x (lane-varying)
    let mut mov = ins(Opcode::Mov);
    mov.dst = dst(ParameterType::Output, 0);
    mov.src[0] = reg(ParameterType::Input, builtin::GLOBAL_INVOCATION_ID_X);

    let mut program = Program::from_shader(&shader_with(vec![mov])).unwrap();
    program.set_workgroup_size([4, 1, 1]);

    let mut bindings = BindingTable::with_capacity(program.subgroup_count([2, 1, 1]));
    program.run(&mut bindings, &[], &[], [0, 0, 0], [2, 1, 1]);

    assert_eq!(bindings.outputs[0], [0.0, 1.0, 2.0, 3.0]);
    assert_eq!(bindings.outputs[1], [4.0, 5.0, 6.0, 7.0]);
}

#[test]
fn workgroup_id_and_count_builtins() {
    // o0 = [workgroup_id.x, workgroup_id.y, num_workgroups.x, 0]
    let mut id = ins(Opcode::Mov);
    id.dst = dst(ParameterType::Output, 0);
    id.dst.mask = 0x3;
    id.src[0] = reg(ParameterType::Input, builtin::WORKGROUP_ID);
    id.src[0].swizzle = 0b00_00_01_00; // xy..

    let mut count = ins(Opcode::Mov);
    count.dst = dst(ParameterType::Output, 0);
    count.dst.mask = 0x4;
    count.src[0] = reg(ParameterType::Input, builtin::NUM_WORKGROUPS);
    count.src[0].swizzle = 0x00; // broadcast x

    let mut program = Program::from_shader(&shader_with(vec![id, count])).unwrap();
    program.set_workgroup_size([1, 1, 1]);

    let mut bindings = BindingTable::with_capacity(program.subgroup_count([3, 2, 1]));
    program.run(&mut bindings, &[], &[], [0, 0, 0], [3, 2, 1]);

    // Workgroup (2, 1): flat index 5.
    assert_eq!(bindings.outputs[5][0], 2.0);
    assert_eq!(bindings.outputs[5][1], 1.0);
    assert_eq!(bindings.outputs[5][2], 3.0);
}

#[test]
fn constants_and_push_constants_reach_the_shader() {
    // o0 = c0 + pc0
    let mut add = ins(Opcode::Add);
    add.dst = dst(ParameterType::Output, 0);
    add.src[0] = reg(ParameterType::Const, 0);
    add.src[1] = reg(ParameterType::Const, prism::PUSH_CONSTANT_BASE);

    let mut program = Program::from_shader(&shader_with(vec![add])).unwrap();
    program.set_constant(0, [1.0, 2.0, 3.0, 4.0]);

    let push: Vec<u8> = [10.0f32, 20.0, 30.0, 40.0]
        .iter()
        .flat_map(|value| value.to_bits().to_le_bytes())
        .collect();

    let mut bindings = BindingTable::with_capacity(1);
    program.run(&mut bindings, &[], &push, [0, 0, 0], [1, 1, 1]);

    assert_eq!(bindings.outputs[0], [11.0, 22.0, 33.0, 44.0]);
}

#[test]
fn active_lane_mask_disables_trailing_lanes() {
    // o0 = active_lane_mask
    let mut mov = ins(Opcode::Mov);
    mov.dst = dst(ParameterType::Output, 0);
    mov.src[0] = reg(ParameterType::Input, builtin::ACTIVE_LANE_MASK);

    let mut program = Program::from_shader(&shader_with(vec![mov])).unwrap();
    program.set_workgroup_size([6, 1, 1]); // 2 subgroups, 6 invocations

    let mut bindings = BindingTable::with_capacity(program.subgroup_count([1, 1, 1]));
    program.run(&mut bindings, &[], &[], [0, 0, 0], [1, 1, 1]);

    assert_eq!(bindings.outputs[0], [1.0, 1.0, 1.0, 1.0]);
    assert_eq!(bindings.outputs[1], [1.0, 1.0, 0.0, 0.0]);
}

#[test]
fn tokens_to_program_round_trip() {
    // ps_3_0: mov oC0, c0 — then run it.
    let tokens = [
        0xFFFF_0300,
        0x0200_0000 | Opcode::Mov as u32,
        0x8000_0000 | ((8u32 & 0x7) << 28) | (((8u32 >> 3) & 0x3) << 11) | 0xF << 16, // oC0
        0xA000_0000 | 0xE4 << 16,                                                     // c0
        0x0000_FFFF,
    ];
    let mut program = Program::from_tokens(&tokens, ShaderType::Pixel).unwrap();
    program.set_constant(0, [0.25, 0.5, 0.75, 1.0]);

    let mut bindings = BindingTable::with_capacity(1);
    program.run(&mut bindings, &[], &[], [0, 0, 0], [1, 1, 1]);
    assert_eq!(bindings.outputs[0], [0.25, 0.5, 0.75, 1.0]);
}

#[test]
fn tree_to_program_pipeline() {
    // main() { color = vec4(0.0, 0.5, 1.0, 1.0); } on the pixel stage.
    let mut arena = Arena::new();

    let color_id = arena.fresh_symbol_id();
    let color = arena.add(Node {
        kind: NodeKind::Symbol {
            name: "color".into(),
            id: color_id,
        },
        ty: Type::float(4, Qualifier::FragColor),
        line: 1,
    });
    let value = arena.add(Node {
        kind: NodeKind::Constant(vec![
            ConstantValue::Float(0.0),
            ConstantValue::Float(0.5),
            ConstantValue::Float(1.0),
            ConstantValue::Float(1.0),
        ]),
        ty: Type::float(4, Qualifier::Const),
        line: 1,
    });
    let assign = arena.add(Node {
        kind: NodeKind::Binary {
            op: BinaryOp::Assign,
            left: color,
            right: value,
        },
        ty: Type::float(4, Qualifier::Temporary),
        line: 1,
    });

    let parameters = arena.add(Node {
        kind: NodeKind::Aggregate {
            op: AggregateOp::Parameters,
            name: String::new(),
            user_defined: false,
            args: Vec::new(),
        },
        ty: Type::of(BasicType::Void, 1, Qualifier::Temporary),
        line: 1,
    });
    let body = arena.add(Node {
        kind: NodeKind::Aggregate {
            op: AggregateOp::Sequence,
            name: String::new(),
            user_defined: false,
            args: vec![assign],
        },
        ty: Type::of(BasicType::Void, 1, Qualifier::Temporary),
        line: 1,
    });
    let main = arena.add(Node {
        kind: NodeKind::Aggregate {
            op: AggregateOp::Function,
            name: "main(".into(),
            user_defined: true,
            args: vec![parameters, body],
        },
        ty: Type::of(BasicType::Void, 1, Qualifier::Temporary),
        line: 1,
    });
    let root: NodeId = arena.add(Node {
        kind: NodeKind::Aggregate {
            op: AggregateOp::Sequence,
            name: String::new(),
            user_defined: false,
            args: vec![main],
        },
        ty: Type::of(BasicType::Void, 1, Qualifier::Temporary),
        line: 1,
    });

    let program = create_program(&mut arena, root, ShaderObject::pixel(0x0300)).unwrap();

    let mut bindings = BindingTable::with_capacity(1);
    program.run(&mut bindings, &[], &[], [0, 0, 0], [1, 1, 1]);
    // gl_FragColor lands in color output register 0.
    assert_eq!(bindings.outputs[0], [0.0, 0.5, 1.0, 1.0]);
}

#[test]
fn semantic_errors_fail_program_creation() {
    let mut arena = Arena::new();

    // An 11-register varying overflows the pixel input file.
    let varying = {
        let id = arena.fresh_symbol_id();
        arena.add(Node {
            kind: NodeKind::Symbol {
                name: "huge".into(),
                id,
            },
            ty: Type::float(4, Qualifier::VaryingIn).array_of(11),
            line: 3,
        })
    };
    let index = arena.add(Node {
        kind: NodeKind::Constant(vec![ConstantValue::Int(0)]),
        ty: Type::of(BasicType::Int, 1, Qualifier::Const),
        line: 3,
    });
    let element = arena.add(Node {
        kind: NodeKind::Binary {
            op: BinaryOp::IndexDirect,
            left: varying,
            right: index,
        },
        ty: Type::float(4, Qualifier::VaryingIn),
        line: 3,
    });
    let target = {
        let id = arena.fresh_symbol_id();
        arena.add(Node {
            kind: NodeKind::Symbol {
                name: "t".into(),
                id,
            },
            ty: Type::float(4, Qualifier::Temporary),
            line: 3,
        })
    };
    let assign = arena.add(Node {
        kind: NodeKind::Binary {
            op: BinaryOp::Assign,
            left: target,
            right: element,
        },
        ty: Type::float(4, Qualifier::Temporary),
        line: 3,
    });
    let root = arena.add(Node {
        kind: NodeKind::Aggregate {
            op: AggregateOp::Sequence,
            name: String::new(),
            user_defined: false,
            args: vec![assign],
        },
        ty: Type::of(BasicType::Void, 1, Qualifier::Temporary),
        line: 3,
    });

    match create_program(&mut arena, root, ShaderObject::pixel(0x0300)) {
        Err(ProgramError::Semantic { diagnostics }) => {
            assert!(!diagnostics.is_empty());
        }
        other => panic!("expected a semantic failure, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn reflection_surfaces_uniforms_and_attributes() {
    let mut arena = Arena::new();

    // main() { pos = transform * position; } on the vertex stage.
    let transform = {
        let id = arena.fresh_symbol_id();
        arena.add(Node {
            kind: NodeKind::Symbol {
                name: "transform".into(),
                id,
            },
            ty: Type::matrix(4, Qualifier::Uniform),
            line: 1,
        })
    };
    let position = {
        let id = arena.fresh_symbol_id();
        arena.add(Node {
            kind: NodeKind::Symbol {
                name: "position".into(),
                id,
            },
            ty: Type::float(4, Qualifier::Attribute),
            line: 1,
        })
    };
    let product = arena.add(Node {
        kind: NodeKind::Binary {
            op: BinaryOp::MatrixTimesVector,
            left: transform,
            right: position,
        },
        ty: Type::float(4, Qualifier::Temporary),
        line: 1,
    });
    let out = {
        let id = arena.fresh_symbol_id();
        arena.add(Node {
            kind: NodeKind::Symbol {
                name: "gl_Position".into(),
                id,
            },
            ty: Type::float(4, Qualifier::Position),
            line: 1,
        })
    };
    let assign = arena.add(Node {
        kind: NodeKind::Binary {
            op: BinaryOp::Assign,
            left: out,
            right: product,
        },
        ty: Type::float(4, Qualifier::Temporary),
        line: 1,
    });
    let root = arena.add(Node {
        kind: NodeKind::Aggregate {
            op: AggregateOp::Sequence,
            name: String::new(),
            user_defined: false,
            args: vec![assign],
        },
        ty: Type::of(BasicType::Void, 1, Qualifier::Temporary),
        line: 1,
    });

    let program = create_program(&mut arena, root, ShaderObject::vertex(0x0300)).unwrap();

    assert_eq!(program.active_uniforms().len(), 1);
    assert_eq!(program.active_uniforms()[0].name, "transform");
    assert_eq!(program.active_uniforms()[0].ty, prism_glsl::reflection::gl::FLOAT_MAT4);

    assert_eq!(program.active_attributes().len(), 1);
    assert_eq!(program.active_attributes()[0].name, "position");

    // gl_Position registers as a varying output.
    assert!(program
        .varyings()
        .iter()
        .any(|varying| varying.name == "gl_Position"));
    assert_eq!(program.sampler_count(), 0);
}
