//! The public program object: compiled code plus reflection.
//!
//! A [`Program`] owns the executable routine materialized from a
//! shader (tree IR or legacy token stream) and the reflection tables
//! the API layer hands out. Running a program drives the
//! workgroup-striped dispatcher over the JIT routine.

use crate::dispatch::{
    self, dispatch, DispatchShape, InvocationContext, SubgroupStep, YieldResult, SIMD_WIDTH,
};

use prism_glsl::{Arena, Attribute, CompileContext, Diagnostic, NodeId, ShaderObject, Uniform, Varying};
use prism_jit::{LowerError, RegisterFile, Routine};
use prism_shader::{Instruction, ParameterType, ParseError, Shader, ShaderType};

use thiserror::Error;

/// Input registers carrying compute built-ins; each is written only
/// when the shader reads it.
pub mod builtin {
    /// `[count.x, count.y, count.z, 0]`.
    pub const NUM_WORKGROUPS: u32 = 0;
    /// `[id.x, id.y, id.z, 0]`.
    pub const WORKGROUP_ID: u32 = 1;
    /// `[size.x, size.y, size.z, 0]`.
    pub const WORKGROUP_SIZE: u32 = 2;
    /// `[subgroups_per_workgroup, invocations_per_subgroup,
    /// subgroup_index, invocations_per_workgroup]`.
    pub const SUBGROUP_INFO: u32 = 3;
    /// Per-lane flat invocation index within the workgroup.
    pub const LOCAL_INVOCATION_INDEX: u32 = 4;
    /// Per-lane local id, one register per axis.
    pub const LOCAL_INVOCATION_ID_X: u32 = 5;
    #[allow(missing_docs)]
    pub const LOCAL_INVOCATION_ID_Y: u32 = 6;
    #[allow(missing_docs)]
    pub const LOCAL_INVOCATION_ID_Z: u32 = 7;
    /// Per-lane global id, one register per axis.
    pub const GLOBAL_INVOCATION_ID_X: u32 = 8;
    #[allow(missing_docs)]
    pub const GLOBAL_INVOCATION_ID_Y: u32 = 9;
    #[allow(missing_docs)]
    pub const GLOBAL_INVOCATION_ID_Z: u32 = 10;
    /// Per-lane 1.0/0.0 enable mask for the trailing subgroup.
    pub const ACTIVE_LANE_MASK: u32 = 11;
}

/// Why program creation failed.
#[derive(Debug, Error)]
pub enum ProgramError {
    /// The token stream was rejected.
    #[error(transparent)]
    Parse(#[from] ParseError),
    /// The tree compiled with semantic errors.
    #[error("compilation produced {} error(s)", diagnostics.len())]
    Semantic {
        /// The collected diagnostics.
        diagnostics: Vec<Diagnostic>,
    },
    /// The back end refused the instruction stream.
    #[error(transparent)]
    Lower(#[from] LowerError),
}

/// Buffers a dispatch reads and writes.
///
/// The register-file execution model has no raw memory instructions;
/// the binding table therefore exposes per-subgroup output capture:
/// output register 0 of every subgroup lands in `outputs`, indexed by
/// `flat_workgroup * subgroups_per_workgroup + subgroup_index`.
#[derive(Debug, Default)]
pub struct BindingTable {
    /// Captured subgroup outputs; sized by the caller to cover the
    /// dispatch.
    pub outputs: Vec<[f32; 4]>,
}

impl BindingTable {
    /// A table with capacity for `subgroup_count` outputs.
    pub fn with_capacity(subgroup_count: usize) -> BindingTable {
        BindingTable {
            outputs: vec![[0.0; 4]; subgroup_count],
        }
    }
}

/// Push-constant bytes map onto the tail of the float constant file,
/// starting at this register.
pub const PUSH_CONSTANT_BASE: u32 = 240;

/// A compiled, runnable program.
#[derive(Debug)]
pub struct Program {
    routine: Routine,
    shape: DispatchShape,

    constants: Vec<[f32; 4]>,
    referenced_inputs: u32,
    sampler_mask: u16,

    varyings: Vec<Varying>,
    active_uniforms: Vec<Uniform>,
    active_attributes: Vec<Attribute>,
}

impl Program {
    /// Compiles a tree-IR shader into a program.
    pub fn from_tree(
        arena: &mut Arena,
        root: NodeId,
        mut object: ShaderObject,
    ) -> Result<Program, ProgramError> {
        let mut context = CompileContext::new();
        prism_glsl::compile(arena, root, &mut object, &mut context);

        if !context.is_valid() {
            return Err(ProgramError::Semantic {
                diagnostics: context.diagnostics().to_vec(),
            });
        }

        let mut program = Program::from_shader(object.shader())?;
        program.varyings = object.varyings;
        program.active_uniforms = object.active_uniforms;
        program.active_attributes = object.active_attributes;
        Ok(program)
    }

    /// Parses and compiles a legacy token stream.
    pub fn from_tokens(tokens: &[u32], stage: ShaderType) -> Result<Program, ProgramError> {
        let shader = Shader::from_tokens(tokens, stage)?;
        Program::from_shader(&shader)
    }

    /// Compiles an already-built shader.
    pub fn from_shader(shader: &Shader) -> Result<Program, ProgramError> {
        let routine = prism_jit::compile(shader)?;
        let info = routine.info().clone();

        Ok(Program {
            routine,
            shape: DispatchShape {
                workgroup_size: [1, 1, 1],
                contains_control_barriers: info.contains_control_barriers,
                workgroup_memory_size: info.workgroup_memory_size,
            },
            constants: vec![[0.0; 4]; shader.dirty_constants_f as usize],
            referenced_inputs: referenced_inputs(shader.instructions()),
            sampler_mask: shader.sampler_mask(),
            varyings: Vec::new(),
            active_uniforms: Vec::new(),
            active_attributes: Vec::new(),
        })
    }

    /// Sets the workgroup size used by subsequent dispatches.
    pub fn set_workgroup_size(&mut self, size: [u32; 3]) {
        assert!(size.iter().all(|&axis| axis > 0));
        self.shape.workgroup_size = size;
    }

    /// Uploads a float constant register.
    pub fn set_constant(&mut self, index: u32, value: [f32; 4]) {
        let index = index as usize;
        if self.constants.len() <= index {
            self.constants.resize(index + 1, [0.0; 4]);
        }
        self.constants[index] = value;
    }

    /// Declared varyings (register-assigned at link).
    pub fn varyings(&self) -> &[Varying] {
        &self.varyings
    }

    /// Active uniforms, samplers included.
    pub fn active_uniforms(&self) -> &[Uniform] {
        &self.active_uniforms
    }

    /// Active vertex attributes.
    pub fn active_attributes(&self) -> &[Attribute] {
        &self.active_attributes
    }

    /// Number of samplers the shader references.
    pub fn sampler_count(&self) -> u32 {
        self.sampler_mask.count_ones()
    }

    /// Subgroups one dispatch of `group_count` produces; sizes the
    /// binding table.
    pub fn subgroup_count(&self, group_count: [u32; 3]) -> usize {
        let groups = group_count[0] * group_count[1] * group_count[2];
        (groups * self.shape.subgroups_per_workgroup()) as usize
    }

    /// Runs the program over the grid.
    ///
    /// `dynamic_offsets` are accepted for interface parity with the
    /// surrounding driver but have no register-file meaning; the
    /// sampler/buffer runtime that consumes them is outside the core.
    pub fn run(
        &self,
        bindings: &mut BindingTable,
        _dynamic_offsets: &[u32],
        push_constants: &[u8],
        base_group: [u32; 3],
        group_count: [u32; 3],
    ) {
        log::debug!(
            "dispatch {}x{}x{} from {:?}",
            group_count[0],
            group_count[1],
            group_count[2],
            base_group
        );

        let needed = self.subgroup_count(group_count);
        if bindings.outputs.len() < needed {
            bindings.outputs.resize(needed, [0.0; 4]);
        }

        let outputs = SharedOutputs(bindings.outputs.as_mut_ptr(), bindings.outputs.len());

        let step = ProgramStep {
            program: self,
            push_constants,
            outputs: &outputs,
        };

        dispatch(&self.shape, &step, base_group, group_count);
    }
}

/// Which input registers any instruction reads.
fn referenced_inputs(instructions: &[Instruction]) -> u32 {
    let mut mask = 0;
    for instruction in instructions {
        for src in &instruction.src {
            if src.ty == ParameterType::Input && src.index < 32 {
                mask |= 1 << src.index;
            }
        }
    }
    mask
}

/// Raw shared view of the output vector. Every subgroup writes its
/// own disjoint slot, so concurrent writers never alias.
struct SharedOutputs(*mut [f32; 4], usize);

unsafe impl Send for SharedOutputs {}
unsafe impl Sync for SharedOutputs {}

impl SharedOutputs {
    unsafe fn write(&self, index: usize, value: [f32; 4]) {
        debug_assert!(index < self.1);
        unsafe { self.0.add(index).write(value) };
    }
}

struct ProgramStep<'a> {
    program: &'a Program,
    push_constants: &'a [u8],
    outputs: &'a SharedOutputs,
}

impl SubgroupStep for ProgramStep<'_> {
    fn step(&self, ctx: &mut InvocationContext<'_>) -> YieldResult {
        for subgroup in ctx.first_subgroup..ctx.first_subgroup + ctx.subgroup_count {
            let mut file = RegisterFile::default();
            self.seed_register_file(&mut file, ctx, subgroup);

            self.program.routine.invoke(&mut file);

            let slot = ctx.flat_workgroup * ctx.shape.subgroups_per_workgroup() + subgroup;
            unsafe { self.outputs.write(slot as usize, file.output[0]) };
        }

        YieldResult::Finished
    }
}

impl ProgramStep<'_> {
    fn seed_register_file(
        &self,
        file: &mut RegisterFile,
        ctx: &InvocationContext<'_>,
        subgroup: u32,
    ) {
        let program = self.program;

        let limit = file.constant.len();
        for (index, value) in program.constants.iter().take(limit).enumerate() {
            file.constant[index] = *value;
        }

        // Push constants overlay the tail of the constant file.
        for (i, chunk) in self.push_constants.chunks(16).enumerate() {
            let register = PUSH_CONSTANT_BASE as usize + i;
            if register >= file.constant.len() {
                break;
            }
            let mut value = [0.0f32; 4];
            for (lane, bytes) in chunk.chunks(4).enumerate() {
                let mut word = [0u8; 4];
                word[..bytes.len()].copy_from_slice(bytes);
                value[lane] = f32::from_bits(u32::from_le_bytes(word));
            }
            file.constant[register] = value;
        }

        let shape = ctx.shape;
        let writes = program.referenced_inputs;
        let write = |file: &mut RegisterFile, register: u32, value: [f32; 4]| {
            if writes & (1 << register) != 0 {
                file.input[register as usize] = value;
            }
        };

        write(
            file,
            builtin::NUM_WORKGROUPS,
            [
                ctx.num_workgroups[0] as f32,
                ctx.num_workgroups[1] as f32,
                ctx.num_workgroups[2] as f32,
                0.0,
            ],
        );
        write(
            file,
            builtin::WORKGROUP_ID,
            [
                ctx.workgroup_id[0] as f32,
                ctx.workgroup_id[1] as f32,
                ctx.workgroup_id[2] as f32,
                0.0,
            ],
        );
        write(
            file,
            builtin::WORKGROUP_SIZE,
            [
                shape.workgroup_size[0] as f32,
                shape.workgroup_size[1] as f32,
                shape.workgroup_size[2] as f32,
                0.0,
            ],
        );
        write(
            file,
            builtin::SUBGROUP_INFO,
            [
                shape.subgroups_per_workgroup() as f32,
                SIMD_WIDTH as f32,
                subgroup as f32,
                shape.invocations_per_workgroup() as f32,
            ],
        );

        // Lane-varying builtins.
        let base_invocation = subgroup * SIMD_WIDTH;
        let mut index = [0.0f32; 4];
        let mut local = [[0.0f32; 4]; 3];
        let mut global = [[0.0f32; 4]; 3];
        for lane in 0..SIMD_WIDTH as usize {
            let invocation = base_invocation + lane as u32;
            index[lane] = invocation as f32;
            let id = dispatch::local_invocation_id(shape, invocation);
            for axis in 0..3 {
                local[axis][lane] = id[axis] as f32;
                global[axis][lane] =
                    (ctx.workgroup_id[axis] * shape.workgroup_size[axis] + id[axis]) as f32;
            }
        }
        write(file, builtin::LOCAL_INVOCATION_INDEX, index);
        write(file, builtin::LOCAL_INVOCATION_ID_X, local[0]);
        write(file, builtin::LOCAL_INVOCATION_ID_Y, local[1]);
        write(file, builtin::LOCAL_INVOCATION_ID_Z, local[2]);
        write(file, builtin::GLOBAL_INVOCATION_ID_X, global[0]);
        write(file, builtin::GLOBAL_INVOCATION_ID_Y, global[1]);
        write(file, builtin::GLOBAL_INVOCATION_ID_Z, global[2]);

        let mask = ctx.active_lane_mask(subgroup);
        let mask_floats = [
            mask[0] as u32 as f32,
            mask[1] as u32 as f32,
            mask[2] as u32 as f32,
            mask[3] as u32 as f32,
        ];
        write(file, builtin::ACTIVE_LANE_MASK, mask_floats);
    }
}
