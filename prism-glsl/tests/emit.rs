//! Emitter behavior over hand-built trees.

use prism_glsl::{
    compile, AggregateOp, Arena, BasicType, BinaryOp, BranchOp, CompileContext, ConstantValue,
    LoopKind, Node, NodeId, NodeKind, Qualifier, ShaderObject, Type,
};
use prism_shader::{Modifier, Opcode, ParameterType};

fn node(arena: &mut Arena, kind: NodeKind, ty: Type) -> NodeId {
    arena.add(Node { kind, ty, line: 1 })
}

fn symbol(arena: &mut Arena, name: &str, ty: Type) -> NodeId {
    let id = arena.fresh_symbol_id();
    node(
        arena,
        NodeKind::Symbol {
            name: name.to_owned(),
            id,
        },
        ty,
    )
}

fn float4_constant(arena: &mut Arena, x: f32, y: f32, z: f32, w: f32) -> NodeId {
    node(
        arena,
        NodeKind::Constant(vec![
            ConstantValue::Float(x),
            ConstantValue::Float(y),
            ConstantValue::Float(z),
            ConstantValue::Float(w),
        ]),
        Type::float(4, Qualifier::Const),
    )
}

fn int_constant(arena: &mut Arena, value: i32) -> NodeId {
    node(
        arena,
        NodeKind::Constant(vec![ConstantValue::Int(value)]),
        Type::of(BasicType::Int, 1, Qualifier::Const),
    )
}

fn bool_constant(arena: &mut Arena, value: bool) -> NodeId {
    node(
        arena,
        NodeKind::Constant(vec![ConstantValue::Bool(value)]),
        Type::of(BasicType::Bool, 1, Qualifier::Const),
    )
}

fn binary(arena: &mut Arena, op: BinaryOp, left: NodeId, right: NodeId, ty: Type) -> NodeId {
    node(arena, NodeKind::Binary { op, left, right }, ty)
}

fn sequence(arena: &mut Arena, args: Vec<NodeId>) -> NodeId {
    node(
        arena,
        NodeKind::Aggregate {
            op: AggregateOp::Sequence,
            name: String::new(),
            user_defined: false,
            args,
        },
        Type::of(BasicType::Void, 1, Qualifier::Temporary),
    )
}

/// Wraps statements into a `main()` function under a toplevel
/// sequence, the shape the parser hands the emitter.
fn program(arena: &mut Arena, statements: Vec<NodeId>) -> NodeId {
    let parameters = node(
        arena,
        NodeKind::Aggregate {
            op: AggregateOp::Parameters,
            name: String::new(),
            user_defined: false,
            args: Vec::new(),
        },
        Type::of(BasicType::Void, 1, Qualifier::Temporary),
    );
    let body = sequence(arena, statements);
    let main = node(
        arena,
        NodeKind::Aggregate {
            op: AggregateOp::Function,
            name: "main(".to_owned(),
            user_defined: true,
            args: vec![parameters, body],
        },
        Type::of(BasicType::Void, 1, Qualifier::Temporary),
    );
    sequence(arena, vec![main])
}

fn compile_pixel(arena: &mut Arena, root: NodeId) -> (ShaderObject, CompileContext) {
    let mut object = ShaderObject::pixel(0x0300);
    let mut context = CompileContext::new();
    compile(arena, root, &mut object, &mut context);
    (object, context)
}

fn compile_vertex(arena: &mut Arena, root: NodeId) -> (ShaderObject, CompileContext) {
    let mut object = ShaderObject::vertex(0x0300);
    let mut context = CompileContext::new();
    compile(arena, root, &mut object, &mut context);
    (object, context)
}

fn count_op(object: &ShaderObject, opcode: Opcode) -> usize {
    object
        .shader()
        .instructions()
        .iter()
        .filter(|instruction| instruction.opcode == opcode)
        .count()
}

#[test]
fn constant_folded_ternary_drops_false_arm() {
    let mut arena = Arena::new();

    let condition = bool_constant(&mut arena, true);
    let true_arm = float4_constant(&mut arena, 1.0, 0.0, 0.0, 1.0);
    let false_arm = float4_constant(&mut arena, 0.0, 1.0, 0.0, 1.0);
    let ternary = node(
        &mut arena,
        NodeKind::Selection {
            condition,
            true_block: Some(true_arm),
            false_block: Some(false_arm),
            ternary: true,
        },
        Type::float(4, Qualifier::Temporary),
    );
    let dst = symbol(&mut arena, "color", Type::float(4, Qualifier::Temporary));
    let assign = binary(
        &mut arena,
        BinaryOp::Assign,
        dst,
        ternary,
        Type::float(4, Qualifier::Temporary),
    );
    let root = program(&mut arena, vec![assign]);

    let (object, context) = compile_pixel(&mut arena, root);
    assert!(context.is_valid());

    assert_eq!(count_op(&object, Opcode::If), 0);
    assert_eq!(count_op(&object, Opcode::Else), 0);
    assert_eq!(count_op(&object, Opcode::Select), 0);

    // The true arm's literal flows through a MOV; the false arm's
    // never appears.
    let movs: Vec<_> = object
        .shader()
        .instructions()
        .iter()
        .filter(|instruction| instruction.opcode == Opcode::Mov)
        .collect();
    assert!(movs
        .iter()
        .any(|mov| mov.src[0].value == [1.0, 0.0, 0.0, 1.0]));
    assert!(!movs
        .iter()
        .any(|mov| mov.src[0].value == [0.0, 1.0, 0.0, 1.0]));
}

#[test]
fn trivial_ternary_selects_branchlessly() {
    let mut arena = Arena::new();

    let condition = symbol(&mut arena, "flag", Type::of(BasicType::Bool, 1, Qualifier::Temporary));
    let a = symbol(&mut arena, "a", Type::float(1, Qualifier::Temporary));
    let b = symbol(&mut arena, "b", Type::float(1, Qualifier::Temporary));
    let ternary = node(
        &mut arena,
        NodeKind::Selection {
            condition,
            true_block: Some(a),
            false_block: Some(b),
            ternary: true,
        },
        Type::float(1, Qualifier::Temporary),
    );
    let dst = symbol(&mut arena, "r", Type::float(1, Qualifier::Temporary));
    let assign = binary(
        &mut arena,
        BinaryOp::Assign,
        dst,
        ternary,
        Type::float(1, Qualifier::Temporary),
    );
    let root = program(&mut arena, vec![assign]);

    let (object, context) = compile_pixel(&mut arena, root);
    assert!(context.is_valid());
    assert_eq!(count_op(&object, Opcode::Select), 1);
    assert_eq!(count_op(&object, Opcode::If), 0);
}

#[test]
fn short_circuit_or_with_user_call() {
    let mut arena = Arena::new();

    let bool_ty = Type::of(BasicType::Bool, 1, Qualifier::Temporary);

    // bool f() { return true; }
    let f_parameters = node(
        &mut arena,
        NodeKind::Aggregate {
            op: AggregateOp::Parameters,
            name: String::new(),
            user_defined: false,
            args: Vec::new(),
        },
        Type::of(BasicType::Void, 1, Qualifier::Temporary),
    );
    let ret_value = bool_constant(&mut arena, true);
    let ret = node(
        &mut arena,
        NodeKind::Branch {
            op: BranchOp::Return,
            expression: Some(ret_value),
        },
        bool_ty.clone(),
    );
    let f_body = sequence(&mut arena, vec![ret]);
    let f = node(
        &mut arena,
        NodeKind::Aggregate {
            op: AggregateOp::Function,
            name: "f(".to_owned(),
            user_defined: true,
            args: vec![f_parameters, f_body],
        },
        bool_ty.clone(),
    );

    // main: r = a || f()
    let a = symbol(&mut arena, "a", bool_ty.clone());
    let call = node(
        &mut arena,
        NodeKind::Aggregate {
            op: AggregateOp::FunctionCall,
            name: "f(".to_owned(),
            user_defined: true,
            args: Vec::new(),
        },
        bool_ty.clone(),
    );
    let or = binary(&mut arena, BinaryOp::LogicalOr, a, call, bool_ty.clone());
    let dst = symbol(&mut arena, "r", bool_ty.clone());
    let assign = binary(&mut arena, BinaryOp::Assign, dst, or, bool_ty);

    let parameters = node(
        &mut arena,
        NodeKind::Aggregate {
            op: AggregateOp::Parameters,
            name: String::new(),
            user_defined: false,
            args: Vec::new(),
        },
        Type::of(BasicType::Void, 1, Qualifier::Temporary),
    );
    let main_body = sequence(&mut arena, vec![assign]);
    let main = node(
        &mut arena,
        NodeKind::Aggregate {
            op: AggregateOp::Function,
            name: "main(".to_owned(),
            user_defined: true,
            args: vec![parameters, main_body],
        },
        Type::of(BasicType::Void, 1, Qualifier::Temporary),
    );
    let root = sequence(&mut arena, vec![f, main]);

    let (object, context) = compile_pixel(&mut arena, root);
    assert!(context.is_valid());

    // No single-instruction OR; the call forces the IF-NOT form.
    assert_eq!(count_op(&object, Opcode::Or), 0);

    let instructions = object.shader().instructions();
    let if_position = instructions
        .iter()
        .position(|instruction| instruction.opcode == Opcode::If)
        .expect("short-circuit emits IF");
    assert_eq!(instructions[if_position].src[0].modifier, Modifier::Not);

    let endif_position = instructions
        .iter()
        .position(|instruction| instruction.opcode == Opcode::EndIf)
        .expect("short-circuit emits ENDIF");
    assert!(if_position < endif_position);

    // The call sits inside the guarded region.
    let call_position = instructions
        .iter()
        .position(|instruction| {
            instruction.opcode == Opcode::Call && instruction.dst.index == 1
        })
        .expect("guarded call to f()");
    assert!(if_position < call_position && call_position < endif_position);
}

#[test]
fn trivial_or_lowers_to_single_and_or() {
    let mut arena = Arena::new();
    let bool_ty = Type::of(BasicType::Bool, 1, Qualifier::Temporary);

    let a = symbol(&mut arena, "a", bool_ty.clone());
    let b = symbol(&mut arena, "b", bool_ty.clone());
    let and = binary(&mut arena, BinaryOp::LogicalAnd, a, b, bool_ty.clone());
    let dst = symbol(&mut arena, "r", bool_ty.clone());
    let assign = binary(&mut arena, BinaryOp::Assign, dst, and, bool_ty);
    let root = program(&mut arena, vec![assign]);

    let (object, context) = compile_pixel(&mut arena, root);
    assert!(context.is_valid());
    assert_eq!(count_op(&object, Opcode::And), 1);
    assert_eq!(count_op(&object, Opcode::If), 0);
}

#[test]
fn over_budget_right_operand_forces_short_circuit() {
    let mut arena = Arena::new();
    let float_ty = Type::float(1, Qualifier::Temporary);
    let bool_ty = Type::of(BasicType::Bool, 1, Qualifier::Temporary);

    // Build a + a + ... deep enough to exceed the budget of 6.
    let a = symbol(&mut arena, "a", float_ty.clone());
    let mut chain = a;
    for _ in 0..7 {
        chain = binary(&mut arena, BinaryOp::Add, chain, a, float_ty.clone());
    }
    // Compare to make it a boolean operand shape; comparisons are
    // never trivial, which is the point.
    let left = symbol(&mut arena, "p", bool_ty.clone());
    let and = binary(&mut arena, BinaryOp::LogicalAnd, left, chain, bool_ty.clone());
    let dst = symbol(&mut arena, "r", bool_ty.clone());
    let assign = binary(&mut arena, BinaryOp::Assign, dst, and, bool_ty);
    let root = program(&mut arena, vec![assign]);

    let (object, context) = compile_pixel(&mut arena, root);
    assert!(context.is_valid());
    assert_eq!(count_op(&object, Opcode::And), 0);
    assert_eq!(count_op(&object, Opcode::If), 1);
    assert_eq!(count_op(&object, Opcode::EndIf), 1);
}

#[test]
fn unrollable_loop_emits_no_while() {
    let mut arena = Arena::new();
    let int_ty = Type::of(BasicType::Int, 1, Qualifier::Temporary);
    let float_ty = Type::float(1, Qualifier::Temporary);

    // for (int i = 0; i < 3; i += 1) x = x * x;
    let i_sym = symbol(&mut arena, "i", int_ty.clone());
    let zero = int_constant(&mut arena, 0);
    let init_assign = binary(&mut arena, BinaryOp::Initialize, i_sym, zero, int_ty.clone());
    let init = sequence(&mut arena, vec![init_assign]);

    let three = int_constant(&mut arena, 3);
    let condition = binary(
        &mut arena,
        BinaryOp::LessThan,
        i_sym,
        three,
        Type::of(BasicType::Bool, 1, Qualifier::Temporary),
    );

    let one = int_constant(&mut arena, 1);
    let increment = binary(&mut arena, BinaryOp::AddAssign, i_sym, one, int_ty.clone());

    let x = symbol(&mut arena, "x", float_ty.clone());
    let square = binary(&mut arena, BinaryOp::Mul, x, x, float_ty.clone());
    let body_assign = binary(&mut arena, BinaryOp::Assign, x, square, float_ty);
    let body = sequence(&mut arena, vec![body_assign]);

    let loop_node = node(
        &mut arena,
        NodeKind::Loop {
            kind: LoopKind::For,
            init: Some(init),
            condition: Some(condition),
            expression: Some(increment),
            body: Some(body),
        },
        Type::of(BasicType::Void, 1, Qualifier::Temporary),
    );
    let root = program(&mut arena, vec![loop_node]);

    let (object, context) = compile_pixel(&mut arena, root);
    assert!(context.is_valid());
    assert_eq!(count_op(&object, Opcode::While), 0);
    assert_eq!(count_op(&object, Opcode::EndWhile), 0);
    // Three copies of the body multiply.
    assert_eq!(count_op(&object, Opcode::Mul), 3);
}

#[test]
fn break_in_body_prevents_unrolling() {
    let mut arena = Arena::new();
    let int_ty = Type::of(BasicType::Int, 1, Qualifier::Temporary);

    let i_sym = symbol(&mut arena, "i", int_ty.clone());
    let zero = int_constant(&mut arena, 0);
    let init_assign = binary(&mut arena, BinaryOp::Initialize, i_sym, zero, int_ty.clone());
    let init = sequence(&mut arena, vec![init_assign]);

    let three = int_constant(&mut arena, 3);
    let condition = binary(
        &mut arena,
        BinaryOp::LessThan,
        i_sym,
        three,
        Type::of(BasicType::Bool, 1, Qualifier::Temporary),
    );

    let one = int_constant(&mut arena, 1);
    let increment = binary(&mut arena, BinaryOp::AddAssign, i_sym, one, int_ty.clone());

    let brk = node(
        &mut arena,
        NodeKind::Branch {
            op: BranchOp::Break,
            expression: None,
        },
        Type::of(BasicType::Void, 1, Qualifier::Temporary),
    );
    let body = sequence(&mut arena, vec![brk]);

    let loop_node = node(
        &mut arena,
        NodeKind::Loop {
            kind: LoopKind::For,
            init: Some(init),
            condition: Some(condition),
            expression: Some(increment),
            body: Some(body),
        },
        Type::of(BasicType::Void, 1, Qualifier::Temporary),
    );
    let root = program(&mut arena, vec![loop_node]);

    let (object, context) = compile_pixel(&mut arena, root);
    assert!(context.is_valid());
    assert_eq!(count_op(&object, Opcode::While), 1);
    assert_eq!(count_op(&object, Opcode::EndWhile), 1);
}

#[test]
fn do_while_emits_single_while_pair() {
    let mut arena = Arena::new();
    let bool_ty = Type::of(BasicType::Bool, 1, Qualifier::Temporary);

    let condition = symbol(&mut arena, "go", bool_ty);
    let x = symbol(&mut arena, "x", Type::float(1, Qualifier::Temporary));
    let sq = binary(&mut arena, BinaryOp::Mul, x, x, Type::float(1, Qualifier::Temporary));
    let body_assign = binary(&mut arena, BinaryOp::Assign, x, sq, Type::float(1, Qualifier::Temporary));
    let body = sequence(&mut arena, vec![body_assign]);

    let loop_node = node(
        &mut arena,
        NodeKind::Loop {
            kind: LoopKind::DoWhile,
            init: None,
            condition: Some(condition),
            expression: None,
            body: Some(body),
        },
        Type::of(BasicType::Void, 1, Qualifier::Temporary),
    );
    let root = program(&mut arena, vec![loop_node]);

    let (object, context) = compile_pixel(&mut arena, root);
    assert!(context.is_valid());
    assert_eq!(count_op(&object, Opcode::While), 1);
    assert_eq!(count_op(&object, Opcode::EndWhile), 1);
    assert_eq!(count_op(&object, Opcode::Test), 1);

    // TEST sits between WHILE and ENDWHILE.
    let instructions = object.shader().instructions();
    let while_position = instructions.iter().position(|i| i.opcode == Opcode::While);
    let test_position = instructions.iter().position(|i| i.opcode == Opcode::Test);
    let endwhile_position = instructions.iter().position(|i| i.opcode == Opcode::EndWhile);
    assert!(while_position < test_position && test_position < endwhile_position);
}

#[test]
fn mat4_multiply_shape() {
    let mut arena = Arena::new();
    let mat4 = Type::matrix(4, Qualifier::Temporary);

    let a = symbol(&mut arena, "a", mat4.clone());
    let b = symbol(&mut arena, "b", mat4.clone());
    let product = binary(&mut arena, BinaryOp::MatrixTimesMatrix, a, b, mat4.clone());
    let c = symbol(&mut arena, "c", mat4.clone());
    let assign = binary(&mut arena, BinaryOp::Assign, c, product, mat4);
    let root = program(&mut arena, vec![assign]);

    let (object, context) = compile_pixel(&mut arena, root);
    assert!(context.is_valid());

    assert_eq!(count_op(&object, Opcode::Mul), 4);
    assert_eq!(count_op(&object, Opcode::Mad), 12);

    // One MUL per destination column, ascending.
    let mul_indices: Vec<u32> = object
        .shader()
        .instructions()
        .iter()
        .filter(|i| i.opcode == Opcode::Mul)
        .map(|i| i.dst.index)
        .collect();
    let base = mul_indices[0];
    assert_eq!(
        mul_indices,
        vec![base, base + 1, base + 2, base + 3]
    );

    // MAD broadcast swizzles walk the source rows: j * 0x55.
    let mut mad_swizzles: Vec<u8> = object
        .shader()
        .instructions()
        .iter()
        .filter(|i| i.opcode == Opcode::Mad)
        .map(|i| i.src[1].swizzle)
        .collect();
    mad_swizzles.sort_unstable();
    assert_eq!(
        mad_swizzles,
        vec![0x55, 0x55, 0x55, 0x55, 0xAA, 0xAA, 0xAA, 0xAA, 0xFF, 0xFF, 0xFF, 0xFF]
    );
}

#[test]
fn varying_overflow_is_a_semantic_error() {
    let mut arena = Arena::new();

    // An 11-register varying cannot fit the 10-register pixel input
    // file.
    let varying = symbol(
        &mut arena,
        "huge",
        Type::float(4, Qualifier::VaryingIn).array_of(11),
    );
    let element = {
        let zero = int_constant(&mut arena, 0);
        binary(
            &mut arena,
            BinaryOp::IndexDirect,
            varying,
            zero,
            Type::float(4, Qualifier::VaryingIn),
        )
    };
    let dst = symbol(&mut arena, "t", Type::float(4, Qualifier::Temporary));
    let assign = binary(
        &mut arena,
        BinaryOp::Assign,
        dst,
        element,
        Type::float(4, Qualifier::Temporary),
    );
    let root = program(&mut arena, vec![assign]);

    let (_object, context) = compile_pixel(&mut arena, root);
    assert!(!context.is_valid());
    assert!(context
        .diagnostics()
        .iter()
        .any(|d| d.reason.contains("Too many varyings")));
}

#[test]
fn point_size_writes_y_only() {
    let mut arena = Arena::new();

    let psize = symbol(&mut arena, "gl_PointSize", Type::float(1, Qualifier::PointSize));
    let value = float4_constant(&mut arena, 4.0, 4.0, 4.0, 4.0);
    let assign = binary(
        &mut arena,
        BinaryOp::Assign,
        psize,
        value,
        Type::float(1, Qualifier::Temporary),
    );
    let root = program(&mut arena, vec![assign]);

    let (object, context) = compile_vertex(&mut arena, root);
    assert!(context.is_valid());

    let store = object
        .shader()
        .instructions()
        .iter()
        .find(|i| i.opcode == Opcode::Mov && i.dst.ty == ParameterType::Output)
        .expect("store to the point-size output");
    assert_eq!(store.dst.mask, 0x2);
}

#[test]
fn distinct_variables_get_distinct_registers() {
    let mut arena = Arena::new();
    let float4 = Type::float(4, Qualifier::Temporary);

    let a = symbol(&mut arena, "a", float4.clone());
    let b = symbol(&mut arena, "b", float4.clone());
    let ca = float4_constant(&mut arena, 1.0, 1.0, 1.0, 1.0);
    let cb = float4_constant(&mut arena, 2.0, 2.0, 2.0, 2.0);
    let assign_a = binary(&mut arena, BinaryOp::Assign, a, ca, float4.clone());
    let assign_b = binary(&mut arena, BinaryOp::Assign, b, cb, float4.clone());
    let sum = binary(&mut arena, BinaryOp::Add, a, b, float4.clone());
    let d = symbol(&mut arena, "d", float4.clone());
    let assign_d = binary(&mut arena, BinaryOp::Assign, d, sum, float4);
    let root = program(&mut arena, vec![assign_a, assign_b, assign_d]);

    let (object, context) = compile_pixel(&mut arena, root);
    assert!(context.is_valid());

    // The ADD reads both live variables from different registers.
    let add = object
        .shader()
        .instructions()
        .iter()
        .find(|i| i.opcode == Opcode::Add)
        .expect("sum emitted");
    assert_ne!(add.src[0].index, add.src[1].index);
}

#[test]
fn return_value_flows_through_function_register() {
    let mut arena = Arena::new();
    let float_ty = Type::float(1, Qualifier::Temporary);

    // float g() { return 2.0; }  r = g();
    let parameters = node(
        &mut arena,
        NodeKind::Aggregate {
            op: AggregateOp::Parameters,
            name: String::new(),
            user_defined: false,
            args: Vec::new(),
        },
        Type::of(BasicType::Void, 1, Qualifier::Temporary),
    );
    let two = node(
        &mut arena,
        NodeKind::Constant(vec![ConstantValue::Float(2.0)]),
        Type::float(1, Qualifier::Const),
    );
    let ret = node(
        &mut arena,
        NodeKind::Branch {
            op: BranchOp::Return,
            expression: Some(two),
        },
        float_ty.clone(),
    );
    let g_body = sequence(&mut arena, vec![ret]);
    let g = node(
        &mut arena,
        NodeKind::Aggregate {
            op: AggregateOp::Function,
            name: "g(".to_owned(),
            user_defined: true,
            args: vec![parameters, g_body],
        },
        float_ty.clone(),
    );

    let call = node(
        &mut arena,
        NodeKind::Aggregate {
            op: AggregateOp::FunctionCall,
            name: "g(".to_owned(),
            user_defined: true,
            args: Vec::new(),
        },
        float_ty.clone(),
    );
    let r = symbol(&mut arena, "r", float_ty.clone());
    let assign = binary(&mut arena, BinaryOp::Assign, r, call, float_ty);

    let main_parameters = node(
        &mut arena,
        NodeKind::Aggregate {
            op: AggregateOp::Parameters,
            name: String::new(),
            user_defined: false,
            args: Vec::new(),
        },
        Type::of(BasicType::Void, 1, Qualifier::Temporary),
    );
    let main_body = sequence(&mut arena, vec![assign]);
    let main = node(
        &mut arena,
        NodeKind::Aggregate {
            op: AggregateOp::Function,
            name: "main(".to_owned(),
            user_defined: true,
            args: vec![main_parameters, main_body],
        },
        Type::of(BasicType::Void, 1, Qualifier::Temporary),
    );
    let root = sequence(&mut arena, vec![g, main]);

    let (object, context) = compile_pixel(&mut arena, root);
    assert!(context.is_valid());

    // Preamble CALL main + RET, labels for both functions, LEAVE in g.
    assert_eq!(count_op(&object, Opcode::Label), 2);
    assert_eq!(count_op(&object, Opcode::Leave), 1);
    assert!(count_op(&object, Opcode::Call) >= 2);
    assert!(count_op(&object, Opcode::Ret) >= 2);
}
