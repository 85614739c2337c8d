//! Lowers a shader instruction stream into executable x86-64 code.
//!
//! A materialized routine operates on a [`RegisterFile`] block whose
//! address arrives in `rdi`. Vector operations map onto SSE over the
//! 16-byte register slots; structured control flow maps onto labels;
//! literal constants live in a pool appended after the code and are
//! reached rip-relative through fixups.

use crate::code::CodeMemory;
use crate::constants;
use crate::LowerError;

use prism_asm::{
    AsmAddress, Assembler, Condition, Gpr, GprMem, Label, Scale, Symbol, Type, Xmm, XmmMem,
};
use prism_shader::{
    Control, DestinationParameter, Instruction, Modifier, Opcode, ParameterType, Shader,
    SourceParameter,
};

use memoffset::offset_of;
use std::collections::HashMap;

/// Runtime register-file block a routine reads and writes.
///
/// The layout is part of the JIT contract; every slot is one
/// 16-byte vector.
#[repr(C, align(16))]
pub struct RegisterFile {
    /// Temporary registers (`r#`).
    pub temp: [[f32; 4]; 32],
    /// Input registers (`v#`).
    pub input: [[f32; 4]; 16],
    /// Output registers (`o#`/`oC#`).
    pub output: [[f32; 4]; 16],
    /// Float constant registers (`c#`).
    pub constant: [[f32; 4]; 256],
    /// Miscellaneous inputs (vPos, vFace).
    pub misc: [[f32; 4]; 4],
    /// Address registers (`a0`, `aL`).
    pub address: [[f32; 4]; 4],
    /// The predicate register (`p0`).
    pub predicate: [f32; 4],
    /// Depth output (`oDepth`).
    pub depth: [f32; 4],
    /// Set non-zero when the invocation discards itself.
    pub kill: u32,
    _pad: [u32; 3],
}

impl Default for RegisterFile {
    fn default() -> RegisterFile {
        RegisterFile {
            temp: [[0.0; 4]; 32],
            input: [[0.0; 4]; 16],
            output: [[0.0; 4]; 16],
            constant: [[0.0; 4]; 256],
            misc: [[0.0; 4]; 4],
            address: [[0.0; 4]; 4],
            predicate: [0.0; 4],
            depth: [0.0; 4],
            kill: 0,
            _pad: [0; 3],
        }
    }
}

/// Entry-point signature of a materialized routine.
pub type RoutineFn = unsafe extern "C" fn(*mut RegisterFile);

/// Reflection the dispatch layer needs about a compiled routine.
#[derive(Debug, Clone, Default)]
pub struct RoutineInfo {
    /// Whether execution can suspend at control barriers. The legacy
    /// ISA has none, so routines run to completion in one step.
    pub contains_control_barriers: bool,
    /// Bytes of workgroup-local scratch the routine expects.
    pub workgroup_memory_size: usize,
}

/// A callable, materialized shader routine.
pub struct Routine {
    memory: CodeMemory,
    info: RoutineInfo,
}

impl std::fmt::Debug for Routine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Routine")
            .field("memory", &self.memory)
            .field("info", &self.info)
            .finish()
    }
}

impl Routine {
    /// Runs the routine over a register file.
    pub fn invoke(&self, file: &mut RegisterFile) {
        let entry: RoutineFn = unsafe { std::mem::transmute(self.memory.as_ptr()) };
        unsafe { entry(file as *mut RegisterFile) };
    }

    /// The raw entry point.
    pub fn entry(&self) -> *const u8 {
        self.memory.as_ptr()
    }

    /// Dispatch-relevant routine properties.
    pub fn info(&self) -> &RoutineInfo {
        &self.info
    }
}

/// Compiles a shader's instruction stream into a callable routine.
pub fn compile(shader: &Shader) -> Result<Routine, LowerError> {
    let mut lowerer = Lowerer {
        asm: Assembler::new(),
        pool: Vec::new(),
        function_labels: HashMap::new(),
        control: Vec::new(),
    };

    // Entry stub: frame, call into the body, unwind, return. The body
    // starts on a bundle boundary.
    let mut body = Label::new();
    lowerer.asm.link_frame();
    lowerer.asm.call_label(&mut body);
    lowerer.asm.unlink_frame();
    lowerer.asm.ret();
    lowerer.asm.align_function();
    lowerer.asm.bind(&mut body);

    for instruction in shader.instructions() {
        lowerer.lower(instruction)?;
    }

    if !lowerer.control.is_empty() {
        return Err(LowerError::UnbalancedControlFlow);
    }
    for (index, label) in &lowerer.function_labels {
        if !label.is_bound() {
            return Err(LowerError::UndefinedFunction { label: *index });
        }
    }

    // Fall off the end of the body.
    lowerer.asm.ret();

    log::debug!(
        "lowered {} instructions to {} bytes ({} pool entries)",
        shader.len(),
        lowerer.asm.position(),
        lowerer.pool.len()
    );

    let memory = CodeMemory::materialize(
        lowerer.asm.bytes(),
        lowerer.asm.fixups(),
        &lowerer.pool,
    )?;

    Ok(Routine {
        memory,
        info: RoutineInfo::default(),
    })
}

enum Frame {
    If {
        next: Label,
        end: Label,
        has_else: bool,
    },
    Loop {
        body: Label,
        test: Label,
        exit: Label,
        condition: Box<SourceParameter>,
    },
}

struct Lowerer {
    asm: Assembler,
    pool: Vec<[f32; 4]>,
    function_labels: HashMap<u32, Label>,
    control: Vec<Frame>,
}

const DATA: Gpr = Gpr::Rdi;

// Scratch assignments within one lowered instruction.
const RESULT: Xmm = Xmm::Xmm0; // also the implicit blendvps mask
const SRC1: Xmm = Xmm::Xmm1;
const SRC2: Xmm = Xmm::Xmm2;
const SCRATCH: Xmm = Xmm::Xmm3;
const STORE: Xmm = Xmm::Xmm4;

impl Lowerer {
    fn lower(&mut self, instruction: &Instruction) -> Result<(), LowerError> {
        let op = instruction.opcode;

        if instruction.predicate {
            return Err(LowerError::Unsupported { opcode: op as u32 });
        }

        match op {
            _ if op.is_version() => {}
            Opcode::Nop | Opcode::Null => {}

            Opcode::Mov | Opcode::B2F => {
                self.load_source(RESULT, &instruction.src[0], op)?;
                self.store_destination(RESULT, &instruction.dst)?;
            }

            Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::Div | Opcode::Min | Opcode::Max => {
                self.load_source(RESULT, &instruction.src[0], op)?;
                self.load_source(SRC1, &instruction.src[1], op)?;
                match op {
                    Opcode::Add => self.asm.addps(RESULT, XmmMem::Xmm(SRC1)),
                    Opcode::Sub => self.asm.subps(RESULT, XmmMem::Xmm(SRC1)),
                    Opcode::Mul => self.asm.mulps(RESULT, XmmMem::Xmm(SRC1)),
                    Opcode::Div => self.asm.divps(RESULT, XmmMem::Xmm(SRC1)),
                    Opcode::Min => self.asm.minps(RESULT, XmmMem::Xmm(SRC1)),
                    Opcode::Max => self.asm.maxps(RESULT, XmmMem::Xmm(SRC1)),
                    _ => unreachable!(),
                }
                self.store_destination(RESULT, &instruction.dst)?;
            }

            Opcode::Mad => {
                self.load_source(RESULT, &instruction.src[0], op)?;
                self.load_source(SRC1, &instruction.src[1], op)?;
                self.load_source(SRC2, &instruction.src[2], op)?;
                self.asm.mulps(RESULT, XmmMem::Xmm(SRC1));
                self.asm.addps(RESULT, XmmMem::Xmm(SRC2));
                self.store_destination(RESULT, &instruction.dst)?;
            }

            Opcode::Lrp => {
                // dst = s2 + s0 * (s1 - s2)
                self.load_source(RESULT, &instruction.src[0], op)?;
                self.load_source(SRC1, &instruction.src[1], op)?;
                self.load_source(SRC2, &instruction.src[2], op)?;
                self.asm.subps(SRC1, XmmMem::Xmm(SRC2));
                self.asm.mulps(RESULT, XmmMem::Xmm(SRC1));
                self.asm.addps(RESULT, XmmMem::Xmm(SRC2));
                self.store_destination(RESULT, &instruction.dst)?;
            }

            Opcode::Rcp => {
                self.load_source(SRC1, &instruction.src[0], op)?;
                self.load_pool(RESULT, constants::ONES);
                self.asm.divps(RESULT, XmmMem::Xmm(SRC1));
                self.store_destination(RESULT, &instruction.dst)?;
            }

            Opcode::Rsq => {
                self.load_source(SRC1, &instruction.src[0], op)?;
                self.asm.sqrtps(SRC1, XmmMem::Xmm(SRC1));
                self.load_pool(RESULT, constants::ONES);
                self.asm.divps(RESULT, XmmMem::Xmm(SRC1));
                self.store_destination(RESULT, &instruction.dst)?;
            }

            Opcode::Sqrt => {
                self.load_source(RESULT, &instruction.src[0], op)?;
                self.asm.sqrtps(RESULT, XmmMem::Xmm(RESULT));
                self.store_destination(RESULT, &instruction.dst)?;
            }

            Opcode::Abs => {
                self.load_source(RESULT, &instruction.src[0], op)?;
                self.and_pool(RESULT, constants::ABS_MASK);
                self.store_destination(RESULT, &instruction.dst)?;
            }

            Opcode::Frc => {
                self.load_source(RESULT, &instruction.src[0], op)?;
                self.asm.movaps(SRC1, XmmMem::Xmm(RESULT));
                self.asm.roundps(SRC1, XmmMem::Xmm(SRC1), constants::ROUND_FLOOR);
                self.asm.subps(RESULT, XmmMem::Xmm(SRC1));
                self.store_destination(RESULT, &instruction.dst)?;
            }

            Opcode::Floor => {
                self.load_source(RESULT, &instruction.src[0], op)?;
                self.asm
                    .roundps(RESULT, XmmMem::Xmm(RESULT), constants::ROUND_FLOOR);
                self.store_destination(RESULT, &instruction.dst)?;
            }

            Opcode::Ceil => {
                self.load_source(RESULT, &instruction.src[0], op)?;
                self.asm
                    .roundps(RESULT, XmmMem::Xmm(RESULT), constants::ROUND_CEIL);
                self.store_destination(RESULT, &instruction.dst)?;
            }

            Opcode::Trunc => {
                self.load_source(RESULT, &instruction.src[0], op)?;
                self.asm
                    .roundps(RESULT, XmmMem::Xmm(RESULT), constants::ROUND_TRUNCATE);
                self.store_destination(RESULT, &instruction.dst)?;
            }

            Opcode::Dp2 | Opcode::Dp3 | Opcode::Dp4 => {
                self.load_source(RESULT, &instruction.src[0], op)?;
                self.load_source(SRC1, &instruction.src[1], op)?;
                self.asm.mulps(RESULT, XmmMem::Xmm(SRC1));
                match op {
                    Opcode::Dp2 => self.and_pool(RESULT, constants::XY_MASK),
                    Opcode::Dp3 => self.and_pool(RESULT, constants::XYZ_MASK),
                    _ => {}
                }
                self.horizontal_sum(RESULT);
                self.store_destination(RESULT, &instruction.dst)?;
            }

            Opcode::Cmp | Opcode::ICmp | Opcode::Slt | Opcode::Sge => {
                let control = match op {
                    Opcode::Slt => Control::Lt,
                    Opcode::Sge => Control::Ge,
                    _ => instruction.control,
                };
                self.lower_compare(instruction, control)?;
            }

            Opcode::And => {
                self.load_source(RESULT, &instruction.src[0], op)?;
                self.load_source(SRC1, &instruction.src[1], op)?;
                self.asm.andps(RESULT, XmmMem::Xmm(SRC1));
                self.store_destination(RESULT, &instruction.dst)?;
            }
            Opcode::Or => {
                self.load_source(RESULT, &instruction.src[0], op)?;
                self.load_source(SRC1, &instruction.src[1], op)?;
                self.asm.orps(RESULT, XmmMem::Xmm(SRC1));
                self.store_destination(RESULT, &instruction.dst)?;
            }
            Opcode::Xor => {
                self.load_source(RESULT, &instruction.src[0], op)?;
                self.load_source(SRC1, &instruction.src[1], op)?;
                self.asm.xorps(RESULT, XmmMem::Xmm(SRC1));
                self.store_destination(RESULT, &instruction.dst)?;
            }
            Opcode::Not => {
                self.load_source(SRC1, &instruction.src[0], op)?;
                self.load_pool(RESULT, constants::ONES);
                self.asm.subps(RESULT, XmmMem::Xmm(SRC1));
                self.store_destination(RESULT, &instruction.dst)?;
            }

            Opcode::F2B => {
                self.load_source(RESULT, &instruction.src[0], op)?;
                self.asm.xorps(SRC1, XmmMem::Xmm(SRC1));
                self.asm
                    .cmpps(RESULT, XmmMem::Xmm(SRC1), constants::CMP_NEQ);
                self.and_pool(RESULT, constants::ONES);
                self.store_destination(RESULT, &instruction.dst)?;
            }

            Opcode::Sgn => {
                self.load_source(RESULT, &instruction.src[0], op)?;
                self.asm.xorps(SCRATCH, XmmMem::Xmm(SCRATCH));
                // positive mask: 0 < x
                self.asm.movaps(SRC1, XmmMem::Xmm(SCRATCH));
                self.asm.cmpps(SRC1, XmmMem::Xmm(RESULT), constants::CMP_LT);
                self.and_pool(SRC1, constants::ONES);
                // negative mask: x < 0
                self.asm
                    .cmpps(RESULT, XmmMem::Xmm(SCRATCH), constants::CMP_LT);
                self.and_pool(RESULT, constants::ONES);
                self.asm.subps(SRC1, XmmMem::Xmm(RESULT));
                self.store_destination(SRC1, &instruction.dst)?;
            }

            Opcode::Select => {
                // Mask from the condition, then blend the arms.
                self.load_source(RESULT, &instruction.src[0], op)?;
                self.asm.xorps(SCRATCH, XmmMem::Xmm(SCRATCH));
                self.asm
                    .cmpps(RESULT, XmmMem::Xmm(SCRATCH), constants::CMP_NEQ);
                self.load_source(SRC1, &instruction.src[1], op)?;
                self.load_source(SRC2, &instruction.src[2], op)?;
                self.asm.movaps(SCRATCH, XmmMem::Xmm(SRC2));
                self.asm.blendvps(SCRATCH, XmmMem::Xmm(SRC1));
                self.store_destination(SCRATCH, &instruction.dst)?;
            }

            Opcode::Extract => {
                // dst = src0[src1], dynamically indexed lane.
                self.lane_index(Gpr::Rax, &instruction.src[1], op)?;
                let base = file_offset(instruction.src[0].ty, instruction.src[0].index)?;
                let address = AsmAddress::base_index_disp(DATA, Gpr::Rax, Scale::Four, base);
                self.asm.movss(Type::F32, RESULT, XmmMem::Mem(address));
                self.asm.pshufd(RESULT, XmmMem::Xmm(RESULT), 0x00);
                self.store_destination(RESULT, &instruction.dst)?;
            }

            Opcode::Insert => {
                // dst[src2] = src1, dynamically indexed lane store.
                self.lane_index(Gpr::Rax, &instruction.src[2], op)?;
                self.load_source(RESULT, &instruction.src[1], op)?;
                let base = file_offset(instruction.dst.ty, instruction.dst.index)?;
                let address = AsmAddress::base_index_disp(DATA, Gpr::Rax, Scale::Four, base);
                self.asm.movss_store(Type::F32, address, RESULT);
            }

            Opcode::Def => {
                let value = [
                    instruction.src[0].value[0],
                    instruction.src[1].value[0],
                    instruction.src[2].value[0],
                    instruction.src[3].value[0],
                ];
                self.load_pool(RESULT, value);
                let offset = file_offset(ParameterType::Const, instruction.dst.index)?;
                self.asm
                    .movups_store(AsmAddress::base_disp(DATA, offset), RESULT);
            }

            Opcode::If => {
                self.test_condition(&instruction.src[0], Opcode::If)?;
                let mut frame = Frame::If {
                    next: Label::new(),
                    end: Label::new(),
                    has_else: false,
                };
                if let Frame::If { next, .. } = &mut frame {
                    self.asm.j(Condition::Equal, next, false);
                }
                self.control.push(frame);
            }

            Opcode::Else => {
                let mut frame = self.control.pop().ok_or(LowerError::UnbalancedControlFlow)?;
                match &mut frame {
                    Frame::If {
                        next,
                        end,
                        has_else,
                    } => {
                        self.asm.jmp(end, false);
                        self.asm.bind(next);
                        *has_else = true;
                    }
                    Frame::Loop { .. } => return Err(LowerError::UnbalancedControlFlow),
                }
                self.control.push(frame);
            }

            Opcode::EndIf => {
                let frame = self.control.pop().ok_or(LowerError::UnbalancedControlFlow)?;
                match frame {
                    Frame::If {
                        mut next,
                        mut end,
                        has_else,
                    } => {
                        if has_else {
                            self.asm.bind(&mut end);
                        } else {
                            self.asm.bind(&mut next);
                        }
                    }
                    Frame::Loop { .. } => return Err(LowerError::UnbalancedControlFlow),
                }
            }

            Opcode::While => {
                self.test_condition(&instruction.src[0], Opcode::While)?;
                let mut frame = Frame::Loop {
                    body: Label::new(),
                    test: Label::new(),
                    exit: Label::new(),
                    condition: Box::new(instruction.src[0].clone()),
                };
                if let Frame::Loop { body, exit, .. } = &mut frame {
                    self.asm.j(Condition::Equal, exit, false);
                    self.asm.bind(body);
                }
                self.control.push(frame);
            }

            Opcode::Test => {
                let mut frame = self.control.pop().ok_or(LowerError::UnbalancedControlFlow)?;
                match &mut frame {
                    Frame::Loop { test, .. } => self.asm.bind(test),
                    Frame::If { .. } => return Err(LowerError::UnbalancedControlFlow),
                }
                self.control.push(frame);
            }

            Opcode::EndWhile => {
                let frame = self.control.pop().ok_or(LowerError::UnbalancedControlFlow)?;
                match frame {
                    Frame::Loop {
                        mut body,
                        mut test,
                        mut exit,
                        condition,
                    } => {
                        // A stream without TEST still needs the
                        // continue target resolved somewhere.
                        if !test.is_bound() {
                            self.asm.bind(&mut test);
                        }
                        // The condition was re-evaluated ahead of this
                        // point; loop while its register is non-zero.
                        self.test_condition(&condition, Opcode::EndWhile)?;
                        self.asm.j(Condition::NotEqual, &mut body, false);
                        self.asm.bind(&mut exit);
                    }
                    Frame::If { .. } => return Err(LowerError::UnbalancedControlFlow),
                }
            }

            Opcode::Break => {
                let position = self.innermost_loop_index()?;
                let mut frame = self.control.swap_remove(position);
                if let Frame::Loop { exit, .. } = &mut frame {
                    self.asm.jmp(exit, false);
                }
                self.control.push(frame);
                let last = self.control.len() - 1;
                self.control.swap(position, last);
            }

            Opcode::Continue => {
                let position = self.innermost_loop_index()?;
                let mut frame = self.control.swap_remove(position);
                if let Frame::Loop { test, .. } = &mut frame {
                    self.asm.jmp(test, false);
                }
                self.control.push(frame);
                let last = self.control.len() - 1;
                self.control.swap(position, last);
            }

            Opcode::BreakC => {
                self.load_source(RESULT, &instruction.src[0], op)?;
                self.load_source(SRC1, &instruction.src[1], op)?;
                self.asm.ucomiss(Type::F32, RESULT, XmmMem::Xmm(SRC1));
                let condition = compare_condition(instruction.control)?;
                let position = self.innermost_loop_index()?;
                let mut frame = self.control.swap_remove(position);
                if let Frame::Loop { exit, .. } = &mut frame {
                    self.asm.j(condition, exit, false);
                }
                self.control.push(frame);
                let last = self.control.len() - 1;
                self.control.swap(position, last);
            }

            Opcode::Discard => {
                let offset = offset_of!(RegisterFile, kill) as i32;
                self.asm
                    .mov_imm_store(Type::I32, AsmAddress::base_disp(DATA, offset), 1);
            }

            Opcode::Label => {
                let index = instruction.dst.index;
                let mut label = self.function_labels.remove(&index).unwrap_or_default();
                self.asm.bind(&mut label);
                self.function_labels.insert(index, label);
            }

            Opcode::Call => {
                let index = instruction.dst.index;
                let mut label = self.function_labels.remove(&index).unwrap_or_default();
                self.asm.call_label(&mut label);
                self.function_labels.insert(index, label);
            }

            Opcode::Ret | Opcode::Leave => {
                self.asm.ret();
            }

            unsupported => {
                return Err(LowerError::Unsupported {
                    opcode: unsupported as u32,
                });
            }
        }

        Ok(())
    }

    fn lower_compare(
        &mut self,
        instruction: &Instruction,
        control: Control,
    ) -> Result<(), LowerError> {
        // Map GT/GE onto the LT/LE predicates by swapping operands.
        let (first, second, predicate) = match control {
            Control::Eq => (0, 1, constants::CMP_EQ),
            Control::Lt => (0, 1, constants::CMP_LT),
            Control::Le => (0, 1, constants::CMP_LE),
            Control::Ne => (0, 1, constants::CMP_NEQ),
            Control::Gt => (1, 0, constants::CMP_LT),
            Control::Ge => (1, 0, constants::CMP_LE),
            _ => {
                return Err(LowerError::Unsupported {
                    opcode: instruction.opcode as u32,
                })
            }
        };

        self.load_source(RESULT, &instruction.src[first], instruction.opcode)?;
        self.load_source(SRC1, &instruction.src[second], instruction.opcode)?;
        self.asm.cmpps(RESULT, XmmMem::Xmm(SRC1), predicate);
        self.and_pool(RESULT, constants::ONES);
        self.store_destination(RESULT, &instruction.dst)
    }

    /// Loads a source register into `xmm`, applying swizzle and
    /// modifier.
    fn load_source(
        &mut self,
        xmm: Xmm,
        src: &SourceParameter,
        opcode: Opcode,
    ) -> Result<(), LowerError> {
        match src.ty {
            ParameterType::FloatLiteral => {
                self.load_pool(xmm, src.value);
            }
            _ => {
                let address = self.source_address(src, opcode)?;
                self.asm.movups(xmm, XmmMem::Mem(address));
            }
        }

        if src.swizzle != 0xE4 {
            self.asm.pshufd(xmm, XmmMem::Xmm(xmm), src.swizzle);
        }

        match src.modifier {
            Modifier::None => {}
            Modifier::Negate => self.xor_pool(xmm, constants::SIGN_MASK),
            Modifier::Abs => self.and_pool(xmm, constants::ABS_MASK),
            Modifier::AbsNegate => {
                self.and_pool(xmm, constants::ABS_MASK);
                self.xor_pool(xmm, constants::SIGN_MASK);
            }
            Modifier::Not => {
                // 1 - x over booleans.
                self.asm.movaps(SCRATCH, XmmMem::Xmm(xmm));
                self.load_pool(xmm, constants::ONES);
                self.asm.subps(xmm, XmmMem::Xmm(SCRATCH));
            }
            _ => {
                return Err(LowerError::Unsupported {
                    opcode: opcode as u32,
                })
            }
        }

        Ok(())
    }

    fn source_address(
        &mut self,
        src: &SourceParameter,
        opcode: Opcode,
    ) -> Result<AsmAddress, LowerError> {
        let offset = file_offset(src.ty, src.index)?;

        if !src.relative {
            return Ok(AsmAddress::base_disp(DATA, offset));
        }

        // Relative addressing: scale the index register's selected
        // lane by the register stride.
        let rel_offset = file_offset(src.rel.ty, src.rel.index)?;
        let lane = i32::from(src.rel.swizzle & 0x3);
        self.asm.movss(
            Type::F32,
            SCRATCH,
            XmmMem::Mem(AsmAddress::base_disp(DATA, rel_offset + lane * 4)),
        );
        self.asm
            .cvttss2si(Type::I64, Type::F32, Gpr::Rax, XmmMem::Xmm(SCRATCH));
        let stride = i32::try_from(src.rel.scale)
            .ok()
            .and_then(|scale| scale.checked_mul(16))
            .ok_or(LowerError::Unsupported {
                opcode: opcode as u32,
            })?;
        self.asm
            .imul_imm(Type::I64, Gpr::Rax, GprMem::Gpr(Gpr::Rax), stride);

        Ok(AsmAddress::base_index_disp(
            DATA,
            Gpr::Rax,
            Scale::One,
            offset,
        ))
    }

    /// Stores `xmm` into the destination register, honoring the write
    /// mask and saturation.
    fn store_destination(
        &mut self,
        xmm: Xmm,
        dst: &DestinationParameter,
    ) -> Result<(), LowerError> {
        if dst.ty == ParameterType::Void {
            return Ok(());
        }
        if dst.relative {
            return Err(LowerError::Unsupported {
                opcode: Opcode::Mov as u32,
            });
        }
        if dst.shift != 0 {
            return Err(LowerError::Unsupported {
                opcode: Opcode::Mov as u32,
            });
        }

        let value = xmm;

        if dst.saturate {
            debug_assert!(value != STORE);
            self.asm.xorps(STORE, XmmMem::Xmm(STORE));
            self.asm.maxps(value, XmmMem::Xmm(STORE));
            self.load_pool(STORE, constants::ONES);
            self.asm.minps(value, XmmMem::Xmm(STORE));
        }

        let offset = file_offset(dst.ty, dst.index)?;
        let address = AsmAddress::base_disp(DATA, offset);

        let mask = dst.mask & 0xF;
        if mask == 0xF {
            self.asm.movups_store(address, value);
        } else if mask != 0 {
            // Read-modify-write blend of the enabled lanes.
            self.asm.movups(STORE, XmmMem::Mem(address.clone()));
            self.asm.blendps(STORE, XmmMem::Xmm(value), mask);
            self.asm.movups_store(address, STORE);
        }

        Ok(())
    }

    /// Loads the dynamic lane index named by a scalar source into
    /// `gpr`.
    fn lane_index(
        &mut self,
        gpr: Gpr,
        src: &SourceParameter,
        opcode: Opcode,
    ) -> Result<(), LowerError> {
        self.load_source(SCRATCH, src, opcode)?;
        self.asm
            .cvttss2si(Type::I64, Type::F32, gpr, XmmMem::Xmm(SCRATCH));
        Ok(())
    }

    /// Evaluates a boolean condition register, leaving EFLAGS with
    /// ZF set when false.
    fn test_condition(&mut self, src: &SourceParameter, opcode: Opcode) -> Result<(), LowerError> {
        self.load_source(RESULT, src, opcode)?;
        self.asm.xorps(SRC1, XmmMem::Xmm(SRC1));
        self.asm.ucomiss(Type::F32, RESULT, XmmMem::Xmm(SRC1));
        Ok(())
    }

    /// Replicates the sum of all four lanes into every lane.
    fn horizontal_sum(&mut self, xmm: Xmm) {
        self.asm.movaps(SCRATCH, XmmMem::Xmm(xmm));
        self.asm.pshufd(SCRATCH, XmmMem::Xmm(SCRATCH), 0x4E); // zwxy
        self.asm.addps(xmm, XmmMem::Xmm(SCRATCH));
        self.asm.movaps(SCRATCH, XmmMem::Xmm(xmm));
        self.asm.pshufd(SCRATCH, XmmMem::Xmm(SCRATCH), 0xB1); // yxwz
        self.asm.addps(xmm, XmmMem::Xmm(SCRATCH));
    }

    fn load_pool(&mut self, xmm: Xmm, value: [f32; 4]) {
        let symbol = self.pool_symbol(value);
        self.asm
            .movups(xmm, XmmMem::Mem(AsmAddress::RipRelative { target: symbol }));
    }

    fn and_pool(&mut self, xmm: Xmm, value: [f32; 4]) {
        let symbol = self.pool_symbol(value);
        self.asm
            .andps(xmm, XmmMem::Mem(AsmAddress::RipRelative { target: symbol }));
    }

    fn xor_pool(&mut self, xmm: Xmm, value: [f32; 4]) {
        let symbol = self.pool_symbol(value);
        self.asm
            .xorps(xmm, XmmMem::Mem(AsmAddress::RipRelative { target: symbol }));
    }

    fn pool_symbol(&mut self, value: [f32; 4]) -> Symbol {
        let bits = value.map(f32::to_bits);
        for (i, entry) in self.pool.iter().enumerate() {
            if entry.map(f32::to_bits) == bits {
                return Symbol(i as u32);
            }
        }
        self.pool.push(value);
        Symbol((self.pool.len() - 1) as u32)
    }

    fn innermost_loop_index(&self) -> Result<usize, LowerError> {
        self.control
            .iter()
            .rposition(|frame| matches!(frame, Frame::Loop { .. }))
            .ok_or(LowerError::UnbalancedControlFlow)
    }
}

fn compare_condition(control: Control) -> Result<Condition, LowerError> {
    // ucomiss sets the unsigned flavor of the flags.
    Ok(match control {
        Control::Gt => Condition::Above,
        Control::Ge => Condition::AboveEqual,
        Control::Lt => Condition::Below,
        Control::Le => Condition::BelowEqual,
        Control::Eq => Condition::Equal,
        Control::Ne => Condition::NotEqual,
        _ => return Err(LowerError::UnsupportedControl),
    })
}

fn file_offset(ty: ParameterType, index: u32) -> Result<i32, LowerError> {
    let (base, limit) = match ty {
        ParameterType::Temp => (offset_of!(RegisterFile, temp), 32),
        ParameterType::Input => (offset_of!(RegisterFile, input), 16),
        ParameterType::Output
        | ParameterType::ColorOut
        | ParameterType::RastOut
        | ParameterType::AttrOut => (offset_of!(RegisterFile, output), 16),
        ParameterType::Const => (offset_of!(RegisterFile, constant), 256),
        ParameterType::MiscType => (offset_of!(RegisterFile, misc), 4),
        ParameterType::Texture | ParameterType::Loop => (offset_of!(RegisterFile, address), 4),
        ParameterType::Predicate => (offset_of!(RegisterFile, predicate), 1),
        ParameterType::DepthOut => (offset_of!(RegisterFile, depth), 1),
        _ => {
            return Err(LowerError::UnsupportedRegisterFile { file: ty as u32 })
        }
    };

    if index >= limit {
        return Err(LowerError::RegisterOutOfRange {
            file: ty as u32,
            index,
        });
    }

    Ok((base + index as usize * 16) as i32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_file_slots_are_16_byte_aligned() {
        assert_eq!(std::mem::align_of::<RegisterFile>(), 16);
        assert_eq!(file_offset(ParameterType::Temp, 0).unwrap() % 16, 0);
        assert_eq!(file_offset(ParameterType::Const, 3).unwrap() % 16, 0);
        assert_eq!(
            file_offset(ParameterType::Temp, 1).unwrap()
                - file_offset(ParameterType::Temp, 0).unwrap(),
            16
        );
    }

    #[test]
    fn out_of_range_registers_are_rejected() {
        assert!(matches!(
            file_offset(ParameterType::Temp, 32),
            Err(LowerError::RegisterOutOfRange { .. })
        ));
        assert!(file_offset(ParameterType::Sampler, 0).is_err());
    }
}
