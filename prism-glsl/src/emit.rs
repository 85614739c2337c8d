//! Tree-IR code emitter.
//!
//! Walks the typed tree depth-first and appends register-based
//! instructions to the target shader, resolving identifiers to
//! register-file indices and recording reflection metadata as a side
//! effect. Emission happens in two passes over the same tree: a
//! GLOBAL pass for top-level code (which also registers user
//! functions), then a FUNCTION pass for function bodies.

use crate::context::CompileContext;
use crate::reflection::{self, Attribute, Uniform, Varying};
use crate::tree::{
    AggregateOp, Arena, BinaryOp, BranchOp, ConstantValue, LoopKind, Node, NodeId, NodeKind,
    UnaryOp,
};
use crate::types::{BasicType, Precision, Qualifier, Type};

use prism_shader::pixel::MAX_INPUT_VARYINGS;
use prism_shader::vertex::{MAX_INPUT_ATTRIBUTES, MAX_OUTPUT_VARYINGS};
use prism_shader::{
    Control, DestinationParameter, Instruction, Modifier, Opcode, ParameterType, PixelShader,
    Semantic, Shader, SourceParameter, Usage, VertexShader,
};
use smallvec::SmallVec;

const NONE: Option<NodeId> = None;

/// The stage being compiled, holding its analysis tables.
#[derive(Debug)]
pub enum Target {
    /// Fragment stage.
    Pixel(PixelShader),
    /// Vertex stage.
    Vertex(VertexShader),
}

/// Compilation output: the shader plus its reflection tables.
#[derive(Debug)]
pub struct ShaderObject {
    /// The stage-specific shader being filled in.
    pub target: Target,
    /// Declared varyings, register-assigned at link time.
    pub varyings: Vec<Varying>,
    /// Active uniforms and samplers.
    pub active_uniforms: Vec<Uniform>,
    /// Active vertex attributes.
    pub active_attributes: Vec<Attribute>,
}

impl ShaderObject {
    /// A fresh pixel-stage object.
    pub fn pixel(version: u16) -> ShaderObject {
        ShaderObject {
            target: Target::Pixel(PixelShader::new(version)),
            varyings: Vec::new(),
            active_uniforms: Vec::new(),
            active_attributes: Vec::new(),
        }
    }

    /// A fresh vertex-stage object.
    pub fn vertex(version: u16) -> ShaderObject {
        ShaderObject {
            target: Target::Vertex(VertexShader::new(version)),
            varyings: Vec::new(),
            active_uniforms: Vec::new(),
            active_attributes: Vec::new(),
        }
    }

    /// The underlying shader.
    pub fn shader(&self) -> &Shader {
        match &self.target {
            Target::Pixel(pixel) => pixel,
            Target::Vertex(vertex) => vertex,
        }
    }

    /// Mutable access to the underlying shader.
    pub fn shader_mut(&mut self) -> &mut Shader {
        match &mut self.target {
            Target::Pixel(pixel) => pixel,
            Target::Vertex(vertex) => vertex,
        }
    }

    fn is_pixel(&self) -> bool {
        matches!(self.target, Target::Pixel(_))
    }

    fn is_vertex(&self) -> bool {
        matches!(self.target, Target::Vertex(_))
    }

    fn pixel_mut(&mut self) -> Option<&mut PixelShader> {
        match &mut self.target {
            Target::Pixel(pixel) => Some(pixel),
            Target::Vertex(_) => None,
        }
    }

    fn vertex_mut(&mut self) -> Option<&mut VertexShader> {
        match &mut self.target {
            Target::Vertex(vertex) => Some(vertex),
            Target::Pixel(_) => None,
        }
    }
}

/// Compiles a tree into `object`, reporting semantic errors on
/// `context`.
pub fn compile(
    arena: &mut Arena,
    root: NodeId,
    object: &mut ShaderObject,
    context: &mut CompileContext,
) {
    let mut emitter = OutputEmitter {
        arena: &mut *arena,
        context: &mut *context,
        object: &mut *object,
        temporaries: Vec::new(),
        uniforms: Vec::new(),
        varyings: Vec::new(),
        attributes: Vec::new(),
        samplers: Vec::new(),
        emit_scope: Scope::Global,
        current_scope: Scope::Global,
        current_function: 0,
        functions: vec![FunctionEntry {
            label: 0,
            name: "main(".to_owned(),
            args: Vec::new(),
            ret: None,
        }],
    };

    emitter.emit_shader(root, Scope::Global);

    if emitter.functions.len() > 1 {
        // Only call main() when there are other functions.
        let call = emitter.emit(Opcode::Call, NONE, NONE, NONE, NONE);
        emitter.instr(call).dst.ty = ParameterType::Label;
        emitter.instr(call).dst.index = 0;
        emitter.emit(Opcode::Ret, NONE, NONE, NONE, NONE);
    }

    emitter.emit_shader(root, Scope::Function);

    object.shader_mut().analyze();
    if let Target::Pixel(pixel) = &mut object.target {
        pixel.analyze();
    }
    if let Target::Vertex(vertex) = &mut object.target {
        vertex.analyze();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scope {
    Global,
    Function,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Visit {
    Pre,
    In,
    Post,
}

#[derive(Debug, Clone)]
struct FunctionEntry {
    label: u32,
    name: String,
    args: Vec<NodeId>,
    /// The function node; doubles as the return-value register.
    ret: Option<NodeId>,
}

#[derive(Debug, Clone, Copy)]
enum VariableFile {
    Temporaries,
    Uniforms,
    Varyings,
    Attributes,
    Samplers,
}

struct OutputEmitter<'a> {
    arena: &'a mut Arena,
    context: &'a mut CompileContext,
    object: &'a mut ShaderObject,

    temporaries: Vec<Option<NodeId>>,
    uniforms: Vec<Option<NodeId>>,
    varyings: Vec<Option<NodeId>>,
    attributes: Vec<Option<NodeId>>,
    samplers: Vec<Option<NodeId>>,

    emit_scope: Scope,
    current_scope: Scope,

    current_function: usize,
    functions: Vec<FunctionEntry>,
}

impl<'a> OutputEmitter<'a> {
    fn emit_shader(&mut self, root: NodeId, scope: Scope) {
        self.emit_scope = scope;
        self.current_scope = Scope::Global;
        self.traverse(root);
    }

    // ------------------------------------------------------------------
    // Traversal driver
    // ------------------------------------------------------------------

    fn traverse(&mut self, id: NodeId) {
        let kind = self.arena.node(id).kind.clone();
        match kind {
            NodeKind::Symbol { .. } => self.visit_symbol(id),
            NodeKind::Constant(_) => {}
            NodeKind::Binary { op, left, right } => {
                if self.visit_binary(Visit::Pre, id, op, left, right) {
                    self.traverse(left);
                    self.visit_binary(Visit::In, id, op, left, right);
                    self.traverse(right);
                    self.visit_binary(Visit::Post, id, op, left, right);
                }
            }
            NodeKind::Unary { op, operand } => {
                if self.visit_unary(Visit::Pre, id, op, operand) {
                    self.traverse(operand);
                    self.visit_unary(Visit::Post, id, op, operand);
                }
            }
            NodeKind::Aggregate { op, ref args, .. } => {
                let args = args.clone();
                if self.visit_aggregate(Visit::Pre, id, op, &args) {
                    for &arg in &args {
                        self.traverse(arg);
                    }
                    self.visit_aggregate(Visit::Post, id, op, &args);
                }
            }
            NodeKind::Selection { .. } => self.visit_selection(id),
            NodeKind::Loop { .. } => self.visit_loop(id),
            NodeKind::Branch { op, expression } => {
                if let Some(expression) = expression {
                    self.traverse(expression);
                }
                self.visit_branch(id, op, expression);
            }
        }
    }

    fn visit_symbol(&mut self, id: NodeId) {
        let qualifier = self.arena.ty(id).qualifier;
        if qualifier == Qualifier::VaryingOut || qualifier == Qualifier::InvariantVaryingOut {
            // Vertex varyings don't have to be actively used to link
            // against pixel shaders that use them, so declare them.
            self.declare_varying(id, -1);
        }
    }

    // ------------------------------------------------------------------
    // Binary expressions
    // ------------------------------------------------------------------

    fn visit_binary(
        &mut self,
        visit: Visit,
        result: NodeId,
        op: BinaryOp,
        left: NodeId,
        right: NodeId,
    ) -> bool {
        if self.current_scope != self.emit_scope {
            return false;
        }

        let left_type = self.arena.ty(left).clone();

        match op {
            BinaryOp::Assign => {
                if visit == Visit::Post {
                    self.assign_lvalue(left, right);
                    self.copy(result, right, 0);
                }
            }
            BinaryOp::Initialize => {
                if visit == Visit::Post {
                    self.copy(left, right, 0);
                }
            }
            BinaryOp::MatrixTimesScalarAssign => {
                if visit == Visit::Post {
                    for i in 0..u32::from(left_type.nominal_size) {
                        let mul = self.emit(Opcode::Mul, Some(result), Some(left), Some(right), NONE);
                        self.instr(mul).dst.index += i;
                        let param = self.argument(left, i);
                        self.instr(mul).src[0] = param;
                    }
                    self.assign_lvalue(left, result);
                }
            }
            BinaryOp::VectorTimesMatrixAssign => {
                if visit == Visit::Post {
                    let size = usize::from(left_type.nominal_size);
                    for i in 0..size {
                        let dot =
                            self.emit(Opcode::dp(size), Some(result), Some(left), Some(right), NONE);
                        self.instr(dot).dst.mask = 1u8 << i;
                        let param = self.argument(right, i as u32);
                        self.instr(dot).src[1] = param;
                    }
                    self.assign_lvalue(left, result);
                }
            }
            BinaryOp::MatrixTimesMatrixAssign => {
                if visit == Visit::Post {
                    let dim = u32::from(left_type.nominal_size);
                    for i in 0..dim {
                        let mul = self.emit(Opcode::Mul, Some(result), Some(left), Some(right), NONE);
                        self.instr(mul).dst.index += i;
                        let param = self.argument(right, i);
                        self.instr(mul).src[1] = param;
                        self.instr(mul).src[1].swizzle = 0x00;

                        for j in 1..dim {
                            let mad = self.emit(
                                Opcode::Mad,
                                Some(result),
                                Some(left),
                                Some(right),
                                Some(result),
                            );
                            self.instr(mad).dst.index += i;
                            let a = self.argument(left, j);
                            self.instr(mad).src[0] = a;
                            let b = self.argument(right, i);
                            self.instr(mad).src[1] = b;
                            self.instr(mad).src[1].swizzle = (j as u8) * 0x55;
                            let c = self.argument(result, i);
                            self.instr(mad).src[2] = c;
                        }
                    }
                    self.assign_lvalue(left, result);
                }
            }
            BinaryOp::IndexDirect => {
                if visit == Visit::Post {
                    let index = self.constant_int_value(right);
                    let result_type = self.arena.ty(result).clone();

                    if result_type.is_matrix() || result_type.is_struct() {
                        debug_assert!(left_type.is_array());
                        let offset = index as u32 * left_type.element_register_count();
                        self.copy(result, left, offset);
                    } else if result_type.is_register() {
                        let mov = self.emit(Opcode::Mov, Some(result), Some(left), NONE, NONE);

                        if left_type.is_register() {
                            self.instr(mov).src[0].swizzle = index as u8;
                        } else if left_type.is_array() {
                            let offset = index as u32 * left_type.element_register_count();
                            let param = self.argument(left, offset);
                            self.instr(mov).src[0] = param;
                        } else if left_type.is_matrix() {
                            if index as u8 >= left_type.nominal_size {
                                let line = self.arena.node(result).line;
                                self.context.error(line, "matrix column out of range", "[]");
                            }
                            let param = self.argument(left, index as u32);
                            self.instr(mov).src[0] = param;
                        } else {
                            unreachable!("direct index on a scalar");
                        }
                    } else {
                        unreachable!("unexpected direct-index result shape");
                    }
                }
            }
            BinaryOp::IndexIndirect => {
                if visit == Visit::Post {
                    let result_type = self.arena.ty(result).clone();

                    if left_type.is_array() || left_type.is_matrix() {
                        for index in 0..result_type.total_register_count() {
                            let mov = self.emit(Opcode::Mov, Some(result), Some(left), NONE, NONE);
                            self.instr(mov).dst.index += index;
                            let mask = self.write_mask(result, index);
                            self.instr(mov).dst.mask = mask;
                            let param = self.argument(left, index);
                            self.instr(mov).src[0] = param;

                            if left_type.total_register_count() > 1 {
                                let relative = self.argument(right, 0);
                                let deterministic = !(self.object.is_vertex()
                                    && left_type.qualifier == Qualifier::Uniform);
                                let instruction = self.instr(mov);
                                instruction.src[0].rel.ty = relative.ty;
                                instruction.src[0].rel.index = relative.index;
                                instruction.src[0].rel.scale = result_type.total_register_count();
                                instruction.src[0].rel.deterministic = deterministic;
                            }
                        }
                    } else if left_type.is_register() {
                        self.emit(Opcode::Extract, Some(result), Some(left), Some(right), NONE);
                    } else {
                        unreachable!("indirect index on a scalar");
                    }
                }
            }
            BinaryOp::IndexDirectStruct => {
                if visit == Visit::Post {
                    debug_assert!(left_type.is_struct());
                    let field_name = self.field_name(right);
                    let mut field_offset = 0;
                    for field in &left_type.fields {
                        if field.name == field_name {
                            break;
                        }
                        field_offset += field.ty.total_register_count();
                    }
                    self.copy(result, left, field_offset);
                }
            }
            BinaryOp::VectorSwizzle => {
                if visit == Visit::Post {
                    let swizzle = self.swizzle_literal(right);
                    let mov = self.emit(Opcode::Mov, Some(result), Some(left), NONE, NONE);
                    self.instr(mov).src[0].swizzle = swizzle;
                }
            }
            BinaryOp::AddAssign => {
                if visit == Visit::Post {
                    self.emit_assign(Opcode::Add, result, left, left, right);
                }
            }
            BinaryOp::Add => {
                if visit == Visit::Post {
                    self.emit_binary(Opcode::Add, result, left, Some(right), NONE);
                }
            }
            BinaryOp::SubAssign => {
                if visit == Visit::Post {
                    self.emit_assign(Opcode::Sub, result, left, left, right);
                }
            }
            BinaryOp::Sub => {
                if visit == Visit::Post {
                    self.emit_binary(Opcode::Sub, result, left, Some(right), NONE);
                }
            }
            BinaryOp::MulAssign => {
                if visit == Visit::Post {
                    self.emit_assign(Opcode::Mul, result, left, left, right);
                }
            }
            BinaryOp::Mul => {
                if visit == Visit::Post {
                    self.emit_binary(Opcode::Mul, result, left, Some(right), NONE);
                }
            }
            BinaryOp::DivAssign => {
                if visit == Visit::Post {
                    self.emit_assign(Opcode::Div, result, left, left, right);
                }
            }
            BinaryOp::Div => {
                if visit == Visit::Post {
                    self.emit_binary(Opcode::Div, result, left, Some(right), NONE);
                }
            }
            BinaryOp::Equal => {
                if visit == Visit::Post {
                    self.emit_cmp(Control::Eq, result, left, right, 0);

                    for index in 1..left_type.total_register_count() {
                        let equal = self.new_temporary();
                        self.emit_cmp(Control::Eq, equal, left, right, index);
                        self.emit(Opcode::And, Some(result), Some(result), Some(equal), NONE);
                        self.free_temporary(equal);
                    }
                }
            }
            BinaryOp::NotEqual => {
                if visit == Visit::Post {
                    self.emit_cmp(Control::Ne, result, left, right, 0);

                    for index in 1..left_type.total_register_count() {
                        let not_equal = self.new_temporary();
                        self.emit_cmp(Control::Ne, not_equal, left, right, index);
                        self.emit(Opcode::Or, Some(result), Some(result), Some(not_equal), NONE);
                        self.free_temporary(not_equal);
                    }
                }
            }
            BinaryOp::LessThan => {
                if visit == Visit::Post {
                    self.emit_cmp(Control::Lt, result, left, right, 0);
                }
            }
            BinaryOp::GreaterThan => {
                if visit == Visit::Post {
                    self.emit_cmp(Control::Gt, result, left, right, 0);
                }
            }
            BinaryOp::LessThanEqual => {
                if visit == Visit::Post {
                    self.emit_cmp(Control::Le, result, left, right, 0);
                }
            }
            BinaryOp::GreaterThanEqual => {
                if visit == Visit::Post {
                    self.emit_cmp(Control::Ge, result, left, right, 0);
                }
            }
            BinaryOp::VectorTimesScalarAssign => {
                if visit == Visit::Post {
                    self.emit_assign(Opcode::Mul, result, left, left, right);
                }
            }
            BinaryOp::VectorTimesScalar => {
                if visit == Visit::Post {
                    self.emit(Opcode::Mul, Some(result), Some(left), Some(right), NONE);
                }
            }
            BinaryOp::MatrixTimesScalar => {
                if visit == Visit::Post {
                    for i in 0..u32::from(left_type.nominal_size) {
                        let mul = self.emit(Opcode::Mul, Some(result), Some(left), Some(right), NONE);
                        self.instr(mul).dst.index += i;
                        let param = self.argument(left, i);
                        self.instr(mul).src[0] = param;
                    }
                }
            }
            BinaryOp::VectorTimesMatrix => {
                if visit == Visit::Post {
                    let size = usize::from(left_type.nominal_size);
                    for i in 0..size {
                        let dot =
                            self.emit(Opcode::dp(size), Some(result), Some(left), Some(right), NONE);
                        self.instr(dot).dst.mask = 1u8 << i;
                        let param = self.argument(right, i as u32);
                        self.instr(dot).src[1] = param;
                    }
                }
            }
            BinaryOp::MatrixTimesVector => {
                if visit == Visit::Post {
                    let mul = self.emit(Opcode::Mul, Some(result), Some(left), Some(right), NONE);
                    self.instr(mul).src[1].swizzle = 0x00;

                    for i in 1..u32::from(left_type.nominal_size) {
                        let mad = self.emit(
                            Opcode::Mad,
                            Some(result),
                            Some(left),
                            Some(right),
                            Some(result),
                        );
                        let param = self.argument(left, i);
                        self.instr(mad).src[0] = param;
                        self.instr(mad).src[1].swizzle = (i as u8) * 0x55;
                    }
                }
            }
            BinaryOp::MatrixTimesMatrix => {
                if visit == Visit::Post {
                    let dim = u32::from(left_type.nominal_size);
                    for i in 0..dim {
                        let mul = self.emit(Opcode::Mul, Some(result), Some(left), Some(right), NONE);
                        self.instr(mul).dst.index += i;
                        let param = self.argument(right, i);
                        self.instr(mul).src[1] = param;
                        self.instr(mul).src[1].swizzle = 0x00;

                        for j in 1..dim {
                            let mad = self.emit(
                                Opcode::Mad,
                                Some(result),
                                Some(left),
                                Some(right),
                                Some(result),
                            );
                            self.instr(mad).dst.index += i;
                            let a = self.argument(left, j);
                            self.instr(mad).src[0] = a;
                            let b = self.argument(right, i);
                            self.instr(mad).src[1] = b;
                            self.instr(mad).src[1].swizzle = (j as u8) * 0x55;
                            let c = self.argument(result, i);
                            self.instr(mad).src[2] = c;
                        }
                    }
                }
            }
            BinaryOp::LogicalOr => {
                if self.trivial(right, 6) {
                    if visit == Visit::Post {
                        self.emit(Opcode::Or, Some(result), Some(left), Some(right), NONE);
                    }
                } else {
                    // Short-circuit evaluation.
                    if visit == Visit::In {
                        self.emit(Opcode::Mov, Some(result), Some(left), NONE, NONE);
                        let ifnot = self.emit(Opcode::If, NONE, Some(result), NONE, NONE);
                        self.instr(ifnot).src[0].modifier = Modifier::Not;
                    } else if visit == Visit::Post {
                        self.emit(Opcode::Mov, Some(result), Some(right), NONE, NONE);
                        self.emit(Opcode::EndIf, NONE, NONE, NONE, NONE);
                    }
                }
            }
            BinaryOp::LogicalXor => {
                if visit == Visit::Post {
                    self.emit(Opcode::Xor, Some(result), Some(left), Some(right), NONE);
                }
            }
            BinaryOp::LogicalAnd => {
                if self.trivial(right, 6) {
                    if visit == Visit::Post {
                        self.emit(Opcode::And, Some(result), Some(left), Some(right), NONE);
                    }
                } else {
                    // Short-circuit evaluation.
                    if visit == Visit::In {
                        self.emit(Opcode::Mov, Some(result), Some(left), NONE, NONE);
                        self.emit(Opcode::If, NONE, Some(result), NONE, NONE);
                    } else if visit == Visit::Post {
                        self.emit(Opcode::Mov, Some(result), Some(right), NONE, NONE);
                        self.emit(Opcode::EndIf, NONE, NONE, NONE, NONE);
                    }
                }
            }
        }

        true
    }

    // ------------------------------------------------------------------
    // Unary expressions
    // ------------------------------------------------------------------

    fn visit_unary(&mut self, visit: Visit, result: NodeId, op: UnaryOp, arg: NodeId) -> bool {
        if self.current_scope != self.emit_scope {
            return false;
        }

        if visit != Visit::Post {
            return true;
        }

        let arg_type = self.arena.ty(arg).clone();

        match op {
            UnaryOp::Negative => {
                for index in 0..arg_type.total_register_count() {
                    let neg = self.emit(Opcode::Mov, Some(result), Some(arg), NONE, NONE);
                    self.instr(neg).dst.index += index;
                    let param = self.argument(arg, index);
                    self.instr(neg).src[0] = param;
                    self.instr(neg).src[0].modifier = Modifier::Negate;
                }
            }
            UnaryOp::VectorLogicalNot | UnaryOp::LogicalNot => {
                self.emit(Opcode::Not, Some(result), Some(arg), NONE, NONE);
            }
            UnaryOp::PostIncrement => {
                self.copy(result, arg, 0);
                let one = self.constant4(1.0, 1.0, 1.0, 1.0);
                for index in 0..arg_type.total_register_count() {
                    let add = self.emit(Opcode::Add, Some(arg), Some(arg), Some(one), NONE);
                    self.instr(add).dst.index += index;
                    let param = self.argument(arg, index);
                    self.instr(add).src[0] = param;
                }
                self.assign_lvalue(arg, arg);
            }
            UnaryOp::PostDecrement => {
                self.copy(result, arg, 0);
                let one = self.constant4(1.0, 1.0, 1.0, 1.0);
                for index in 0..arg_type.total_register_count() {
                    let sub = self.emit(Opcode::Sub, Some(arg), Some(arg), Some(one), NONE);
                    self.instr(sub).dst.index += index;
                    let param = self.argument(arg, index);
                    self.instr(sub).src[0] = param;
                }
                self.assign_lvalue(arg, arg);
            }
            UnaryOp::PreIncrement => {
                let one = self.constant4(1.0, 1.0, 1.0, 1.0);
                for index in 0..arg_type.total_register_count() {
                    let add = self.emit(Opcode::Add, Some(result), Some(arg), Some(one), NONE);
                    self.instr(add).dst.index += index;
                    let param = self.argument(arg, index);
                    self.instr(add).src[0] = param;
                }
                self.assign_lvalue(arg, result);
            }
            UnaryOp::PreDecrement => {
                let one = self.constant4(1.0, 1.0, 1.0, 1.0);
                for index in 0..arg_type.total_register_count() {
                    let sub = self.emit(Opcode::Sub, Some(result), Some(arg), Some(one), NONE);
                    self.instr(sub).dst.index += index;
                    let param = self.argument(arg, index);
                    self.instr(sub).src[0] = param;
                }
                self.assign_lvalue(arg, result);
            }
            UnaryOp::Radians => {
                let rad = self.constant4(1.74532925e-2, 1.74532925e-2, 1.74532925e-2, 1.74532925e-2);
                self.emit(Opcode::Mul, Some(result), Some(arg), Some(rad), NONE);
            }
            UnaryOp::Degrees => {
                let deg = self.constant4(5.72957795e+1, 5.72957795e+1, 5.72957795e+1, 5.72957795e+1);
                self.emit(Opcode::Mul, Some(result), Some(arg), Some(deg), NONE);
            }
            UnaryOp::Sin => {
                self.emit(Opcode::Sin, Some(result), Some(arg), NONE, NONE);
            }
            UnaryOp::Cos => {
                self.emit(Opcode::Cos, Some(result), Some(arg), NONE, NONE);
            }
            UnaryOp::Tan => {
                self.emit(Opcode::Tan, Some(result), Some(arg), NONE, NONE);
            }
            UnaryOp::Asin => {
                self.emit(Opcode::Asin, Some(result), Some(arg), NONE, NONE);
            }
            UnaryOp::Acos => {
                self.emit(Opcode::Acos, Some(result), Some(arg), NONE, NONE);
            }
            UnaryOp::Atan => {
                self.emit(Opcode::Atan, Some(result), Some(arg), NONE, NONE);
            }
            UnaryOp::Exp => {
                self.emit(Opcode::Exp, Some(result), Some(arg), NONE, NONE);
            }
            UnaryOp::Log => {
                self.emit(Opcode::Log, Some(result), Some(arg), NONE, NONE);
            }
            UnaryOp::Exp2 => {
                self.emit(Opcode::Exp2, Some(result), Some(arg), NONE, NONE);
            }
            UnaryOp::Log2 => {
                self.emit(Opcode::Log2, Some(result), Some(arg), NONE, NONE);
            }
            UnaryOp::Sqrt => {
                self.emit(Opcode::Sqrt, Some(result), Some(arg), NONE, NONE);
            }
            UnaryOp::InverseSqrt => {
                self.emit(Opcode::Rsq, Some(result), Some(arg), NONE, NONE);
            }
            UnaryOp::Abs => {
                self.emit(Opcode::Abs, Some(result), Some(arg), NONE, NONE);
            }
            UnaryOp::Sign => {
                self.emit(Opcode::Sgn, Some(result), Some(arg), NONE, NONE);
            }
            UnaryOp::Floor => {
                self.emit(Opcode::Floor, Some(result), Some(arg), NONE, NONE);
            }
            UnaryOp::Ceil => {
                self.emit(Opcode::Ceil, Some(result), Some(arg), Some(result), NONE);
            }
            UnaryOp::Fract => {
                self.emit(Opcode::Frc, Some(result), Some(arg), NONE, NONE);
            }
            UnaryOp::Length => {
                let size = self.dim(arg);
                self.emit(Opcode::len(size), Some(result), Some(arg), NONE, NONE);
            }
            UnaryOp::Normalize => {
                let size = self.dim(arg);
                self.emit(Opcode::nrm(size), Some(result), Some(arg), NONE, NONE);
            }
            UnaryOp::DFdx => {
                self.emit(Opcode::Dsx, Some(result), Some(arg), NONE, NONE);
            }
            UnaryOp::DFdy => {
                self.emit(Opcode::Dsy, Some(result), Some(arg), NONE, NONE);
            }
            UnaryOp::Fwidth => {
                self.emit(Opcode::Fwidth, Some(result), Some(arg), NONE, NONE);
            }
            UnaryOp::Any => {
                self.emit(Opcode::Any, Some(result), Some(arg), NONE, NONE);
            }
            UnaryOp::All => {
                self.emit(Opcode::All, Some(result), Some(arg), NONE, NONE);
            }
        }

        true
    }

    // ------------------------------------------------------------------
    // Aggregates: sequences, functions, calls, constructors, intrinsics
    // ------------------------------------------------------------------

    fn visit_aggregate(
        &mut self,
        visit: Visit,
        result: NodeId,
        op: AggregateOp,
        args: &[NodeId],
    ) -> bool {
        if self.current_scope != self.emit_scope
            && op != AggregateOp::Function
            && op != AggregateOp::Sequence
        {
            return false;
        }

        match op {
            AggregateOp::Sequence | AggregateOp::Declaration | AggregateOp::Prototype => {}
            AggregateOp::Comma => {
                if visit == Visit::Post {
                    self.copy(result, args[1], 0);
                }
            }
            AggregateOp::Function => {
                if visit == Visit::Pre {
                    let name = self.aggregate_name(result);

                    match self.emit_scope {
                        Scope::Function => {
                            if self.functions.len() > 1 {
                                // No label needed when there's only main().
                                let function = self
                                    .find_function(&name)
                                    .expect("function registered during the global pass");
                                let label = function.label;
                                self.current_function = label as usize;

                                let instruction =
                                    self.emit(Opcode::Label, NONE, NONE, NONE, NONE);
                                self.instr(instruction).dst.ty = ParameterType::Label;
                                self.instr(instruction).dst.index = label;
                            }
                        }
                        Scope::Global => {
                            if name != "main(" {
                                let parameters = self.function_parameters(args);
                                self.functions.push(FunctionEntry {
                                    label: self.functions.len() as u32,
                                    name,
                                    args: parameters,
                                    ret: Some(result),
                                });
                            }
                        }
                    }

                    self.current_scope = Scope::Function;
                } else if visit == Visit::Post {
                    if self.emit_scope == Scope::Function && self.functions.len() > 1 {
                        self.emit(Opcode::Ret, NONE, NONE, NONE, NONE);
                    }
                    self.current_scope = Scope::Global;
                }
            }
            AggregateOp::FunctionCall => {
                if visit == Visit::Post {
                    self.emit_function_call(result, args);
                }
            }
            AggregateOp::Parameters => {}
            AggregateOp::Construct => {
                if visit == Visit::Post {
                    self.emit_constructor(result, args);
                }
            }
            AggregateOp::ConstructStruct => {
                if visit == Visit::Post {
                    let mut offset = 0;
                    for &arg in args {
                        let size = self.arena.ty(arg).total_register_count();
                        for index in 0..size {
                            let mov = self.emit(Opcode::Mov, Some(result), Some(arg), NONE, NONE);
                            self.instr(mov).dst.index += index + offset;
                            let mask = self.write_mask(result, offset + index);
                            self.instr(mov).dst.mask = mask;
                            let param = self.argument(arg, index);
                            self.instr(mov).src[0] = param;
                        }
                        offset += size;
                    }
                }
            }
            AggregateOp::LessThan => {
                if visit == Visit::Post {
                    self.emit_cmp(Control::Lt, result, args[0], args[1], 0);
                }
            }
            AggregateOp::GreaterThan => {
                if visit == Visit::Post {
                    self.emit_cmp(Control::Gt, result, args[0], args[1], 0);
                }
            }
            AggregateOp::LessThanEqual => {
                if visit == Visit::Post {
                    self.emit_cmp(Control::Le, result, args[0], args[1], 0);
                }
            }
            AggregateOp::GreaterThanEqual => {
                if visit == Visit::Post {
                    self.emit_cmp(Control::Ge, result, args[0], args[1], 0);
                }
            }
            AggregateOp::VectorEqual => {
                if visit == Visit::Post {
                    self.emit_cmp(Control::Eq, result, args[0], args[1], 0);
                }
            }
            AggregateOp::VectorNotEqual => {
                if visit == Visit::Post {
                    self.emit_cmp(Control::Ne, result, args[0], args[1], 0);
                }
            }
            AggregateOp::Mod => {
                if visit == Visit::Post {
                    self.emit(Opcode::Mod, Some(result), Some(args[0]), Some(args[1]), NONE);
                }
            }
            AggregateOp::Pow => {
                if visit == Visit::Post {
                    self.emit(Opcode::Pow, Some(result), Some(args[0]), Some(args[1]), NONE);
                }
            }
            AggregateOp::Atan2 => {
                if visit == Visit::Post {
                    self.emit(Opcode::Atan2, Some(result), Some(args[0]), Some(args[1]), NONE);
                }
            }
            AggregateOp::Min => {
                if visit == Visit::Post {
                    self.emit(Opcode::Min, Some(result), Some(args[0]), Some(args[1]), NONE);
                }
            }
            AggregateOp::Max => {
                if visit == Visit::Post {
                    self.emit(Opcode::Max, Some(result), Some(args[0]), Some(args[1]), NONE);
                }
            }
            AggregateOp::Clamp => {
                if visit == Visit::Post {
                    self.emit(Opcode::Max, Some(result), Some(args[0]), Some(args[1]), NONE);
                    self.emit(Opcode::Min, Some(result), Some(result), Some(args[2]), NONE);
                }
            }
            AggregateOp::Mix => {
                if visit == Visit::Post {
                    self.emit(
                        Opcode::Lrp,
                        Some(result),
                        Some(args[2]),
                        Some(args[1]),
                        Some(args[0]),
                    );
                }
            }
            AggregateOp::Step => {
                if visit == Visit::Post {
                    self.emit(Opcode::Step, Some(result), Some(args[0]), Some(args[1]), NONE);
                }
            }
            AggregateOp::SmoothStep => {
                if visit == Visit::Post {
                    self.emit(
                        Opcode::Smooth,
                        Some(result),
                        Some(args[0]),
                        Some(args[1]),
                        Some(args[2]),
                    );
                }
            }
            AggregateOp::Distance => {
                if visit == Visit::Post {
                    let size = self.dim(args[0]);
                    self.emit(
                        Opcode::dist(size),
                        Some(result),
                        Some(args[0]),
                        Some(args[1]),
                        NONE,
                    );
                }
            }
            AggregateOp::Dot => {
                if visit == Visit::Post {
                    let size = self.dim(args[0]);
                    self.emit(
                        Opcode::dp(size),
                        Some(result),
                        Some(args[0]),
                        Some(args[1]),
                        NONE,
                    );
                }
            }
            AggregateOp::Cross => {
                if visit == Visit::Post {
                    self.emit(Opcode::Crs, Some(result), Some(args[0]), Some(args[1]), NONE);
                }
            }
            AggregateOp::FaceForward => {
                if visit == Visit::Post {
                    let size = self.dim(args[0]);
                    self.emit(
                        Opcode::forward(size),
                        Some(result),
                        Some(args[0]),
                        Some(args[1]),
                        Some(args[2]),
                    );
                }
            }
            AggregateOp::Reflect => {
                if visit == Visit::Post {
                    let size = self.dim(args[0]);
                    self.emit(
                        Opcode::reflect(size),
                        Some(result),
                        Some(args[0]),
                        Some(args[1]),
                        NONE,
                    );
                }
            }
            AggregateOp::Refract => {
                if visit == Visit::Post {
                    let size = self.dim(args[0]);
                    self.emit(
                        Opcode::refract(size),
                        Some(result),
                        Some(args[0]),
                        Some(args[1]),
                        Some(args[2]),
                    );
                }
            }
            AggregateOp::MatrixCompMult => {
                if visit == Visit::Post {
                    let dim = self.dim2(args[0]);
                    debug_assert_eq!(dim, self.dim2(args[1]));
                    for i in 0..dim as u32 {
                        let mul =
                            self.emit(Opcode::Mul, Some(result), Some(args[0]), Some(args[1]), NONE);
                        self.instr(mul).dst.index += i;
                        let a = self.argument(args[0], i);
                        self.instr(mul).src[0] = a;
                        let b = self.argument(args[1], i);
                        self.instr(mul).src[1] = b;
                    }
                }
            }
        }

        true
    }

    fn emit_function_call(&mut self, result: NodeId, args: &[NodeId]) {
        let (name, user_defined) = match &self.arena.node(result).kind {
            NodeKind::Aggregate {
                name, user_defined, ..
            } => (name.clone(), *user_defined),
            _ => unreachable!(),
        };

        if user_defined {
            let function = match self.find_function(&name) {
                Some(function) => function.clone(),
                None => {
                    let line = self.arena.node(result).line;
                    self.context
                        .error(line, "function definition not found", &name);
                    return;
                }
            };

            // Copy-in for in/inout/const parameters.
            for (i, &parameter) in function.args.iter().enumerate() {
                let qualifier = self.arena.ty(parameter).qualifier;
                if matches!(
                    qualifier,
                    Qualifier::In | Qualifier::InOut | Qualifier::ConstReadOnly
                ) {
                    self.copy(parameter, args[i], 0);
                }
            }

            let call = self.emit(Opcode::Call, NONE, NONE, NONE, NONE);
            self.instr(call).dst.ty = ParameterType::Label;
            self.instr(call).dst.index = function.label;

            if let Some(ret) = function.ret {
                if self.arena.ty(ret).basic != BasicType::Void {
                    self.copy(result, ret, 0);
                }
            }

            // Copy-out for out/inout parameters.
            for (i, &parameter) in function.args.iter().enumerate() {
                let qualifier = self.arena.ty(parameter).qualifier;
                if matches!(qualifier, Qualifier::Out | Qualifier::InOut) {
                    self.copy(args[i], parameter, 0);
                }
            }
        } else {
            self.emit_texture_call(&name, result, args);
        }
    }

    fn emit_texture_call(&mut self, name: &str, result: NodeId, args: &[NodeId]) {
        match name {
            "texture2D" | "textureCube" => {
                if args.len() == 2 {
                    self.emit(Opcode::Tex, Some(result), Some(args[1]), Some(args[0]), NONE);
                } else if args.len() == 3 {
                    // Bias in the w lane.
                    let uvwb = self.new_temporary();
                    self.emit(Opcode::Mov, Some(uvwb), Some(args[1]), NONE, NONE);
                    let bias = self.emit(Opcode::Mov, Some(uvwb), Some(args[2]), NONE, NONE);
                    self.instr(bias).dst.mask = 0x8;

                    let tex = self.emit(Opcode::Tex, Some(result), Some(uvwb), Some(args[0]), NONE);
                    self.instr(tex).bias = true;
                    self.free_temporary(uvwb);
                } else {
                    unreachable!("texture lookup arity");
                }
            }
            "texture2DProj" => {
                let size = self.arena.ty(args[1]).nominal_size;

                if args.len() == 2 {
                    let tex = self.emit(Opcode::Tex, Some(result), Some(args[1]), Some(args[0]), NONE);
                    self.instr(tex).project = true;

                    if size == 3 {
                        self.instr(tex).src[0].swizzle = 0xA4;
                    } else {
                        debug_assert_eq!(size, 4);
                    }
                } else if args.len() == 3 {
                    let proj = self.new_temporary();
                    self.emit_projection_divide(proj, args[1], size);

                    let bias = self.emit(Opcode::Mov, Some(proj), Some(args[2]), NONE, NONE);
                    self.instr(bias).dst.mask = 0x8;

                    let tex = self.emit(Opcode::Tex, Some(result), Some(proj), Some(args[0]), NONE);
                    self.instr(tex).bias = true;
                    self.free_temporary(proj);
                } else {
                    unreachable!("texture lookup arity");
                }
            }
            "texture2DLod" | "textureCubeLod" => {
                let uvwb = self.new_temporary();
                self.emit(Opcode::Mov, Some(uvwb), Some(args[1]), NONE, NONE);
                let lod = self.emit(Opcode::Mov, Some(uvwb), Some(args[2]), NONE, NONE);
                self.instr(lod).dst.mask = 0x8;

                self.emit(Opcode::TexLdl, Some(result), Some(uvwb), Some(args[0]), NONE);
                self.free_temporary(uvwb);
            }
            "texture2DProjLod" => {
                let size = self.arena.ty(args[1]).nominal_size;
                let proj = self.new_temporary();
                self.emit_projection_divide(proj, args[1], size);

                let lod = self.emit(Opcode::Mov, Some(proj), Some(args[2]), NONE, NONE);
                self.instr(lod).dst.mask = 0x8;

                self.emit(Opcode::TexLdl, Some(result), Some(proj), Some(args[0]), NONE);
                self.free_temporary(proj);
            }
            _ => {
                let line = self.arena.node(result).line;
                self.context.error(line, "unsupported builtin", name);
            }
        }
    }

    /// Divides the coordinate by its projection component (.z for
    /// vec3, .w for vec4) into the xy lanes of `proj`.
    fn emit_projection_divide(&mut self, proj: NodeId, coordinate: NodeId, size: u8) {
        let div = self.emit(Opcode::Div, Some(proj), Some(coordinate), Some(coordinate), NONE);
        match size {
            3 => self.instr(div).src[1].swizzle = 0xAA,
            4 => self.instr(div).src[1].swizzle = 0xFF,
            _ => unreachable!("projective coordinate must be vec3 or vec4"),
        }
        self.instr(div).dst.mask = 0x3;
    }

    fn emit_constructor(&mut self, result: NodeId, args: &[NodeId]) {
        let result_type = self.arena.ty(result).clone();

        if !result_type.is_matrix() {
            let mut component = 0u32;

            for &arg in args {
                let arg_type = self.arena.ty(arg).clone();
                let size = u32::from(arg_type.nominal_size);

                if !arg_type.is_matrix() {
                    let mov = self.emit_cast(result, arg);
                    self.instr(mov).dst.mask = ((0xF << component) & 0xF) as u8;
                    let swizzle = self.read_swizzle(arg, size as usize);
                    self.instr(mov).src[0].swizzle = swizzle << (component * 2);

                    component += size;
                } else {
                    let mut column = 0;

                    while component < u32::from(result_type.nominal_size) {
                        let mov = self.emit_cast(result, arg);
                        self.instr(mov).dst.mask = ((0xF << component) & 0xF) as u8;
                        self.instr(mov).src[0].index += column;
                        let swizzle = self.read_swizzle(arg, size as usize);
                        self.instr(mov).src[0].swizzle = swizzle << (component * 2);

                        column += 1;
                        component += size;
                    }
                }
            }
        } else {
            let dim = u32::from(result_type.nominal_size);
            let arg0 = args[0];
            let arg0_type = self.arena.ty(arg0).clone();

            if arg0_type.is_scalar() && args.len() == 1 {
                // Scale matrix: zero each column, then the diagonal.
                let zero = self.constant4(0.0, 0.0, 0.0, 0.0);
                for i in 0..dim {
                    let init = self.emit(Opcode::Mov, Some(result), Some(zero), NONE, NONE);
                    self.instr(init).dst.index += i;
                    let mov = self.emit_cast(result, arg0);
                    self.instr(mov).dst.index += i;
                    self.instr(mov).dst.mask = (1u32 << i) as u8;
                    debug_assert_eq!(self.instr(mov).src[0].swizzle, 0x00);
                }
            } else if arg0_type.is_matrix() {
                let source_dim = u32::from(arg0_type.nominal_size);
                for i in 0..dim {
                    if dim > source_dim {
                        // Fill new rows/columns from the identity.
                        let column = self.constant4(
                            if i == 0 { 1.0 } else { 0.0 },
                            if i == 1 { 1.0 } else { 0.0 },
                            if i == 2 { 1.0 } else { 0.0 },
                            if i == 3 { 1.0 } else { 0.0 },
                        );
                        let mov = self.emit_cast(result, column);
                        self.instr(mov).dst.index += i;
                    }

                    if i < source_dim {
                        let mov = self.emit_cast(result, arg0);
                        self.instr(mov).dst.index += i;
                        self.instr(mov).dst.mask = (0xFu32 >> (4 - source_dim)) as u8;
                        let param = self.argument(arg0, i);
                        self.instr(mov).src[0] = param;
                    }
                }
            } else {
                // Column-major fill from a scalar/vector argument list.
                let mut column = 0u32;
                let mut row = 0u32;

                for &arg in args {
                    let arg_type = self.arena.ty(arg).clone();
                    let size = u32::from(arg_type.nominal_size);
                    let mut element = 0u32;

                    while element < size {
                        let mov = self.emit_cast(result, arg);
                        self.instr(mov).dst.index += column;
                        self.instr(mov).dst.mask = ((0xF << row) & 0xF) as u8;
                        let swizzle = self.read_swizzle(arg, size as usize);
                        self.instr(mov).src[0].swizzle =
                            (swizzle << (row * 2)).wrapping_add(0x55 * element as u8);

                        let end = row + size - element;
                        column = if end >= dim { column + 1 } else { column };
                        element += dim - row;
                        row = if end >= dim { 0 } else { end };
                    }
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Selection, loops, branches
    // ------------------------------------------------------------------

    fn visit_selection(&mut self, id: NodeId) {
        if self.current_scope != self.emit_scope {
            return;
        }

        let (condition, true_block, false_block, ternary) = match self.arena.node(id).kind {
            NodeKind::Selection {
                condition,
                true_block,
                false_block,
                ternary,
            } => (condition, true_block, false_block, ternary),
            _ => unreachable!(),
        };

        let constant_condition = self.constant_bool_of(condition);

        self.traverse(condition);

        if ternary {
            if let Some(value) = constant_condition {
                let taken = if value { true_block } else { false_block };
                if let Some(taken) = taken {
                    self.traverse(taken);
                    self.copy(id, taken, 0);
                }
            } else if self.trivial(id, 6) {
                // Fast to compute both arms and no side effects.
                let true_block = true_block.expect("ternary has both arms");
                let false_block = false_block.expect("ternary has both arms");
                self.traverse(true_block);
                self.traverse(false_block);
                self.emit(
                    Opcode::Select,
                    Some(id),
                    Some(condition),
                    Some(true_block),
                    Some(false_block),
                );
            } else {
                self.emit(Opcode::If, NONE, Some(condition), NONE, NONE);

                if let Some(true_block) = true_block {
                    self.traverse(true_block);
                    self.copy(id, true_block, 0);
                }

                if let Some(false_block) = false_block {
                    self.emit(Opcode::Else, NONE, NONE, NONE, NONE);
                    self.traverse(false_block);
                    self.copy(id, false_block, 0);
                }

                self.emit(Opcode::EndIf, NONE, NONE, NONE, NONE);
            }
        } else if let Some(value) = constant_condition {
            let taken = if value { true_block } else { false_block };
            if let Some(taken) = taken {
                self.traverse(taken);
            }
        } else {
            self.emit(Opcode::If, NONE, Some(condition), NONE, NONE);

            if let Some(true_block) = true_block {
                self.traverse(true_block);
            }

            if let Some(false_block) = false_block {
                self.emit(Opcode::Else, NONE, NONE, NONE, NONE);
                self.traverse(false_block);
            }

            self.emit(Opcode::EndIf, NONE, NONE, NONE, NONE);
        }
    }

    fn visit_loop(&mut self, id: NodeId) {
        if self.current_scope != self.emit_scope {
            return;
        }

        let (kind, init, condition, expression, body) = match self.arena.node(id).kind {
            NodeKind::Loop {
                kind,
                init,
                condition,
                expression,
                body,
            } => (kind, init, condition, expression, body),
            _ => unreachable!(),
        };

        let iterations = self.loop_count(id);

        if iterations == Some(0) {
            return;
        }

        let unroll = match iterations {
            Some(n) if n <= 4 => !self.detect_loop_discontinuity(id),
            _ => false,
        };

        if kind == LoopKind::DoWhile {
            let condition = condition.expect("do-while has a condition");
            let iterate = self.new_temporary();
            let true_constant = self.constant_bool(true);
            self.emit(Opcode::Mov, Some(iterate), Some(true_constant), NONE, NONE);

            // The back end gives this pattern do-while semantics: the
            // TEST marks where the condition becomes authoritative.
            self.emit(Opcode::While, NONE, Some(iterate), NONE, NONE);

            if let Some(body) = body {
                self.traverse(body);
            }

            self.emit(Opcode::Test, NONE, NONE, NONE, NONE);

            self.traverse(condition);
            self.emit(Opcode::Mov, Some(iterate), Some(condition), NONE, NONE);

            self.emit(Opcode::EndWhile, NONE, NONE, NONE, NONE);
            self.free_temporary(iterate);
        } else {
            if let Some(init) = init {
                self.traverse(init);
            }

            if unroll {
                let count = iterations.unwrap();
                log::trace!("unrolling loop with {} iterations", count);
                for _ in 0..count {
                    // An unrollable condition has no side effects.
                    if let Some(body) = body {
                        self.traverse(body);
                    }

                    if let Some(expression) = expression {
                        self.traverse(expression);
                    }
                }
            } else {
                let condition = condition.expect("structured loop has a condition");
                self.traverse(condition);

                self.emit(Opcode::While, NONE, Some(condition), NONE, NONE);

                if let Some(body) = body {
                    self.traverse(body);
                }

                self.emit(Opcode::Test, NONE, NONE, NONE, NONE);

                if let Some(expression) = expression {
                    self.traverse(expression);
                }

                self.traverse(condition);

                self.emit(Opcode::EndWhile, NONE, NONE, NONE, NONE);
            }
        }
    }

    fn visit_branch(&mut self, _id: NodeId, op: BranchOp, expression: Option<NodeId>) {
        if self.current_scope != self.emit_scope {
            return;
        }

        match op {
            BranchOp::Kill => {
                self.emit(Opcode::Discard, NONE, NONE, NONE, NONE);
            }
            BranchOp::Break => {
                self.emit(Opcode::Break, NONE, NONE, NONE, NONE);
            }
            BranchOp::Continue => {
                self.emit(Opcode::Continue, NONE, NONE, NONE, NONE);
            }
            BranchOp::Return => {
                if let Some(value) = expression {
                    if let Some(ret) = self.functions[self.current_function].ret {
                        self.copy(ret, value, 0);
                    }
                }
                self.emit(Opcode::Leave, NONE, NONE, NONE, NONE);
            }
        }
    }

    // ------------------------------------------------------------------
    // Emission primitives
    // ------------------------------------------------------------------

    /// Appends an instruction, resolving the destination and up to
    /// three sources, and returns its index for patching.
    fn emit(
        &mut self,
        op: Opcode,
        dst: Option<NodeId>,
        src0: Option<NodeId>,
        src1: Option<NodeId>,
        src2: Option<NodeId>,
    ) -> usize {
        self.emit_indexed(op, dst, src0, src1, src2, 0)
    }

    fn emit_indexed(
        &mut self,
        op: Opcode,
        dst: Option<NodeId>,
        src0: Option<NodeId>,
        src1: Option<NodeId>,
        src2: Option<NodeId>,
        index: u32,
    ) -> usize {
        let mut op = op;
        if let Some(dst) = dst {
            // Can't assign to a sampler; hit when indexing sampler
            // arrays.
            if self.register_type(dst) == ParameterType::Sampler {
                op = Opcode::Null;
            }
        }

        let mut instruction = Instruction::new(op);

        if let Some(dst) = dst {
            instruction.dst.ty = self.register_type(dst);
            instruction.dst.index = self.register_index(dst) + index;
            instruction.dst.mask = self.write_mask(dst, 0);
            instruction.dst.integer = self.arena.ty(dst).basic == BasicType::Int;
        }

        if let Some(src) = src0 {
            instruction.src[0] = self.argument(src, index);
        }
        if let Some(src) = src1 {
            instruction.src[1] = self.argument(src, index);
        }
        if let Some(src) = src2 {
            instruction.src[2] = self.argument(src, index);
        }

        self.object.shader_mut().append(instruction)
    }

    /// Mutable access to an appended instruction.
    fn instr(&mut self, index: usize) -> &mut Instruction {
        &mut self.object.shader_mut().instructions_mut()[index]
    }

    /// Inserts a conversion when source and destination basic types
    /// disagree; otherwise a plain move.
    fn emit_cast(&mut self, dst: NodeId, src: NodeId) -> usize {
        let dst_basic = self.arena.ty(dst).basic;
        let src_basic = self.arena.ty(src).basic;

        // Integers are implemented as float.
        if (dst_basic == BasicType::Float || dst_basic == BasicType::Int)
            && src_basic == BasicType::Bool
        {
            return self.emit(Opcode::B2F, Some(dst), Some(src), NONE, NONE);
        }
        if dst_basic == BasicType::Bool
            && (src_basic == BasicType::Float || src_basic == BasicType::Int)
        {
            return self.emit(Opcode::F2B, Some(dst), Some(src), NONE, NONE);
        }
        if dst_basic == BasicType::Int && src_basic == BasicType::Float {
            return self.emit(Opcode::Trunc, Some(dst), Some(src), NONE, NONE);
        }

        self.emit(Opcode::Mov, Some(dst), Some(src), NONE, NONE)
    }

    /// Element-register-wide binary emission.
    fn emit_binary(
        &mut self,
        op: Opcode,
        dst: NodeId,
        src0: NodeId,
        src1: Option<NodeId>,
        src2: Option<NodeId>,
    ) {
        for index in 0..self.arena.ty(dst).element_register_count() {
            self.emit_indexed(op, Some(dst), Some(src0), src1, src2, index);
        }
    }

    fn emit_assign(&mut self, op: Opcode, result: NodeId, lhs: NodeId, src0: NodeId, src1: NodeId) {
        self.emit_binary(op, result, src0, Some(src1), NONE);
        self.assign_lvalue(lhs, result);
    }

    fn emit_cmp(&mut self, control: Control, dst: NodeId, left: NodeId, right: NodeId, index: u32) {
        let boolean = self.arena.ty(left).basic == BasicType::Bool;
        let opcode = if boolean { Opcode::ICmp } else { Opcode::Cmp };

        let cmp = self.emit(opcode, Some(dst), Some(left), Some(right), NONE);
        self.instr(cmp).control = control;
        let a = self.argument(left, index);
        self.instr(cmp).src[0] = a;
        let b = self.argument(right, index);
        self.instr(cmp).src[1] = b;
    }

    /// Register-by-register copy of `src` into `dst`, reading from
    /// `offset` registers into the source.
    fn copy(&mut self, dst: NodeId, src: NodeId, offset: u32) {
        for index in 0..self.arena.ty(dst).total_register_count() {
            let mov = self.emit(Opcode::Mov, Some(dst), Some(src), NONE, NONE);
            self.instr(mov).dst.index += index;
            let mask = self.write_mask(dst, index);
            self.instr(mov).dst.mask = mask;
            let param = self.argument(src, offset + index);
            self.instr(mov).src[0] = param;
        }
    }

    /// Builds the source parameter for register `index` of `node`.
    fn argument(&mut self, node: NodeId, index: u32) -> SourceParameter {
        let ty = self.arena.ty(node).clone();
        debug_assert!(index < ty.total_register_count());

        let mut parameter = SourceParameter::default();
        let size = register_size(&ty, index);

        parameter.ty = self.register_type(node);

        if ty.qualifier == Qualifier::Const {
            // Literal constants are carried in the parameter itself.
            let component = component_count(&ty, index) as usize;
            let constants = self.constant_components(node);

            for i in 0..4usize {
                parameter.value[i] = if size == 1 {
                    // Replicate scalars.
                    constants[component].as_float()
                } else if i < size as usize {
                    constants[component + i].as_float()
                } else {
                    0.0
                };
            }
        } else {
            parameter.index = self.register_index(node) + index;

            if parameter.ty == ParameterType::Sampler {
                if let NodeKind::Binary { op, left, right } = self.arena.node(node).kind.clone() {
                    match op {
                        BinaryOp::IndexDirect => {
                            parameter.index += self.constant_int_value(right) as u32;
                        }
                        BinaryOp::IndexIndirect => {
                            if self.arena.ty(left).array_size > 1 {
                                parameter.rel.ty = self.register_type(right);
                                parameter.rel.index = self.register_index(right);
                                parameter.rel.scale = 1;
                                parameter.rel.deterministic = true;
                            }
                        }
                        _ => unreachable!("sampler indexing operator"),
                    }
                }
            }
        }

        if !ty.basic.is_sampler() {
            parameter.swizzle = self.read_swizzle(node, size as usize);
        }

        parameter
    }

    // ------------------------------------------------------------------
    // L-value resolution
    // ------------------------------------------------------------------

    fn assign_lvalue(&mut self, dst: NodeId, src: NodeId) {
        let dst_kind = self.arena.node(dst).kind.clone();
        let dst_type = self.arena.ty(dst).clone();

        if let NodeKind::Binary {
            op: BinaryOp::IndexIndirect,
            right,
            ..
        } = dst_kind
        {
            if dst_type.is_scalar() {
                // A dynamically addressed scalar store needs INSERT.
                let mut parameter = DestinationParameter::default();
                let address = self.new_temporary();
                self.lvalue(&mut parameter, address, dst);

                let mut instruction = Instruction::new(Opcode::Insert);
                instruction.dst = parameter.clone();
                instruction.src[0].ty = parameter.ty;
                instruction.src[0].index = parameter.index;
                instruction.src[0].rel = parameter.rel;
                instruction.src[1] = self.argument(src, 0);
                instruction.src[2] = self.argument(right, 0);

                self.object.shader_mut().append(instruction);
                self.free_temporary(address);
                return;
            }
        }

        for offset in 0..dst_type.total_register_count() {
            let mut parameter = DestinationParameter::default();
            let address = self.new_temporary();
            let swizzle = self.lvalue(&mut parameter, address, dst);
            parameter.index += offset;

            if offset > 0 {
                parameter.mask = self.write_mask(dst, offset);
            }

            let mut instruction = Instruction::new(Opcode::Mov);
            instruction.dst = parameter;
            instruction.src[0] = self.argument(src, offset);
            instruction.src[0].swizzle =
                prism_shader::swizzle::compose(instruction.src[0].swizzle, swizzle);

            self.object.shader_mut().append(instruction);
            self.free_temporary(address);
        }
    }

    /// Resolves `node` as an assignable destination, producing the
    /// register, mask and any relative addressing into `dst`, and
    /// returning the store swizzle.
    fn lvalue(&mut self, dst: &mut DestinationParameter, address: NodeId, node: NodeId) -> u8 {
        let node_kind = self.arena.node(node).kind.clone();
        let node_type = self.arena.ty(node).clone();

        match node_kind {
            NodeKind::Binary { op, left, right } => {
                let left_type = self.arena.ty(left).clone();
                let left_swizzle = self.lvalue(dst, address, left);

                match op {
                    BinaryOp::IndexDirect => {
                        let right_index = self.constant_int_value(right);

                        if left_type.is_register() {
                            let element =
                                prism_shader::swizzle::element(left_swizzle, right_index as usize);
                            dst.mask = 1 << element;
                            element
                        } else if left_type.is_array() || left_type.is_matrix() {
                            dst.index += right_index as u32 * node_type.total_register_count();
                            0xE4
                        } else {
                            unreachable!("direct index on a scalar l-value")
                        }
                    }
                    BinaryOp::IndexIndirect => {
                        if left_type.is_register() {
                            // Requires INSERT; handled by assign_lvalue.
                        } else if left_type.is_array() || left_type.is_matrix() {
                            let scale = node_type.total_register_count();

                            if dst.rel.ty == ParameterType::Void {
                                // Use the index register directly.
                                if left_type.total_register_count() > 1 {
                                    let relative = self.argument(right, 0);
                                    dst.rel.index = relative.index;
                                    dst.rel.ty = relative.ty;
                                    dst.rel.scale = scale;
                                    dst.rel.deterministic = !(self.object.is_vertex()
                                        && left_type.qualifier == Qualifier::Uniform);
                                }
                            } else if dst.rel.index != self.register_index(address) {
                                // Fold the previous index into the
                                // address register.
                                let old_scale = self.constant_int(dst.rel.scale as i32);
                                if scale == 1 {
                                    let mad = self.emit(
                                        Opcode::Mad,
                                        Some(address),
                                        Some(address),
                                        Some(old_scale),
                                        Some(right),
                                    );
                                    self.instr(mad).src[0].index = dst.rel.index;
                                    self.instr(mad).src[0].ty = dst.rel.ty;
                                } else {
                                    let mul = self.emit(
                                        Opcode::Mul,
                                        Some(address),
                                        Some(address),
                                        Some(old_scale),
                                        NONE,
                                    );
                                    self.instr(mul).src[0].index = dst.rel.index;
                                    self.instr(mul).src[0].ty = dst.rel.ty;

                                    let new_scale = self.constant_int(scale as i32);
                                    self.emit(
                                        Opcode::Mad,
                                        Some(address),
                                        Some(right),
                                        Some(new_scale),
                                        Some(address),
                                    );
                                }

                                dst.rel.ty = ParameterType::Temp;
                                dst.rel.index = self.register_index(address);
                                dst.rel.scale = 1;
                            } else {
                                // Accumulate onto the address register.
                                if scale == 1 {
                                    self.emit(
                                        Opcode::Add,
                                        Some(address),
                                        Some(address),
                                        Some(right),
                                        NONE,
                                    );
                                } else {
                                    let new_scale = self.constant_int(scale as i32);
                                    self.emit(
                                        Opcode::Mad,
                                        Some(address),
                                        Some(right),
                                        Some(new_scale),
                                        Some(address),
                                    );
                                }
                            }
                        } else {
                            unreachable!("indirect index on a scalar l-value")
                        }
                        0xE4
                    }
                    BinaryOp::IndexDirectStruct => {
                        let field_name = self.field_name(right);
                        let mut offset = 0;
                        for field in &left_type.fields {
                            if field.name == field_name {
                                dst.ty = self.register_type(left);
                                dst.index += offset;
                                dst.mask = self.write_mask(right, 0);
                                return 0xE4;
                            }
                            offset += field.ty.total_register_count();
                        }
                        0xE4
                    }
                    BinaryOp::VectorSwizzle => {
                        debug_assert!(left_type.is_register());

                        let left_mask = dst.mask;
                        let mut swizzle = 0u8;
                        let mut right_mask = 0u8;

                        let components = self.swizzle_components(right);
                        for (i, &component) in components.iter().enumerate() {
                            let element =
                                prism_shader::swizzle::element(left_swizzle, component as usize);
                            right_mask |= 1 << element;
                            swizzle |= prism_shader::swizzle::element(left_swizzle, i)
                                << (element * 2);
                        }

                        dst.mask = left_mask & right_mask;
                        swizzle
                    }
                    _ => unreachable!("not an l-value operator"),
                }
            }
            NodeKind::Symbol { .. } => {
                dst.ty = self.register_type(node);
                dst.index = self.register_index(node);
                dst.mask = self.write_mask(node, 0);
                0xE4
            }
            _ => 0xE4,
        }
    }

    // ------------------------------------------------------------------
    // Register assignment
    // ------------------------------------------------------------------

    fn register_type(&mut self, operand: NodeId) -> ParameterType {
        let ty = self.arena.ty(operand);

        if ty.basic.is_sampler()
            && (ty.qualifier == Qualifier::Uniform || ty.qualifier == Qualifier::Temporary)
        {
            // Function parameters are temporaries.
            return ParameterType::Sampler;
        }

        match ty.qualifier {
            Qualifier::Temporary | Qualifier::Global => ParameterType::Temp,
            Qualifier::Const => ParameterType::FloatLiteral,
            Qualifier::Attribute => ParameterType::Input,
            Qualifier::VaryingIn | Qualifier::InvariantVaryingIn => ParameterType::Input,
            Qualifier::VaryingOut | Qualifier::InvariantVaryingOut => ParameterType::Output,
            Qualifier::Uniform => ParameterType::Const,
            Qualifier::In | Qualifier::Out | Qualifier::InOut | Qualifier::ConstReadOnly => {
                ParameterType::Temp
            }
            Qualifier::Position | Qualifier::PointSize => ParameterType::Output,
            Qualifier::FragCoord | Qualifier::FrontFacing => ParameterType::MiscType,
            Qualifier::PointCoord => ParameterType::Input,
            Qualifier::FragColor | Qualifier::FragData => ParameterType::ColorOut,
        }
    }

    fn register_index(&mut self, operand: NodeId) -> u32 {
        if self.register_type(operand) == ParameterType::Sampler {
            return self.sampler_register(operand);
        }

        match self.arena.ty(operand).qualifier {
            Qualifier::Temporary
            | Qualifier::Global
            | Qualifier::In
            | Qualifier::Out
            | Qualifier::InOut
            | Qualifier::ConstReadOnly => self.temporary_register(operand),
            Qualifier::Attribute => self.attribute_register(operand),
            Qualifier::VaryingIn
            | Qualifier::VaryingOut
            | Qualifier::InvariantVaryingIn
            | Qualifier::InvariantVaryingOut
            | Qualifier::Position
            | Qualifier::PointSize
            | Qualifier::PointCoord => self.varying_register(operand),
            Qualifier::Uniform => self.uniform_register(operand),
            Qualifier::FragCoord => {
                if let Some(pixel) = self.object.pixel_mut() {
                    pixel.v_pos_declared = true;
                }
                0
            }
            Qualifier::FrontFacing => {
                if let Some(pixel) = self.object.pixel_mut() {
                    pixel.v_face_declared = true;
                }
                1
            }
            Qualifier::FragColor | Qualifier::FragData => 0,
            Qualifier::Const => unreachable!("literals have no register"),
        }
    }

    fn write_mask(&mut self, destination: NodeId, index: u32) -> u8 {
        if self.arena.ty(destination).qualifier == Qualifier::PointSize {
            // Point size is stored in the y component.
            return 0x2;
        }

        let ty = self.arena.ty(destination).clone();
        (0xFu32 >> (4 - register_size(&ty, index))) as u8
    }

    fn read_swizzle(&mut self, argument: NodeId, size: usize) -> u8 {
        if self.arena.ty(argument).qualifier == Qualifier::PointSize {
            // Point size is stored in the y component.
            return 0x55;
        }

        prism_shader::swizzle::swizzle_for_size(size)
    }

    fn temporary_register(&mut self, temporary: NodeId) -> u32 {
        self.allocate_in(VariableFile::Temporaries, temporary)
    }

    fn varying_register(&mut self, varying: NodeId) -> u32 {
        if let Some(index) = self.lookup_in(VariableFile::Varyings, varying) {
            return index;
        }

        let var = self.allocate_in(VariableFile::Varyings, varying);
        let ty = self.arena.ty(varying).clone();
        let component_count = u32::from(ty.nominal_size);
        let register_count = ty.total_register_count();
        let line = self.arena.node(varying).line;

        if self.object.is_pixel() {
            if var + register_count > MAX_INPUT_VARYINGS as u32 {
                self.context.error(
                    line,
                    "Varyings packing failed: Too many varyings",
                    "fragment shader",
                );
                return 0;
            }

            let qualifier = ty.qualifier;
            let pixel = self.object.pixel_mut().unwrap();

            if qualifier == Qualifier::PointCoord {
                debug_assert!(ty.is_register());
                for component in 0..component_count.min(4) as usize {
                    pixel.semantic[var as usize][component] =
                        Semantic::new(Usage::TexCoord, var as u8);
                }
            } else {
                for i in 0..register_count {
                    let register = (var + i) as usize;
                    for component in 0..component_count.min(4) as usize {
                        pixel.semantic[register][component] =
                            Semantic::new(Usage::Color, register as u8);
                    }
                }
            }
        } else {
            if var + register_count > MAX_OUTPUT_VARYINGS as u32 {
                self.context.error(
                    line,
                    "Varyings packing failed: Too many varyings",
                    "vertex shader",
                );
                return 0;
            }

            let qualifier = ty.qualifier;
            let vertex = self.object.vertex_mut().unwrap();

            if qualifier == Qualifier::Position {
                debug_assert!(ty.is_register());
                for component in 0..4 {
                    vertex.output[var as usize][component] = Semantic::new(Usage::Position, 0);
                }
                vertex.position_register = var as i32;
            } else if qualifier == Qualifier::PointSize {
                debug_assert!(ty.is_register());
                for component in 0..4 {
                    vertex.output[var as usize][component] = Semantic::new(Usage::PointSize, 0);
                }
                vertex.point_size_register = var as i32;
            } else {
                // User varyings get semantic indexes at program link,
                // paired with the pixel shader.
            }
        }

        self.declare_varying(varying, var as i32);

        var
    }

    fn declare_varying(&mut self, varying: NodeId, register: i32) {
        if self.arena.ty(varying).qualifier == Qualifier::PointCoord {
            // gl_PointCoord does not participate in linking.
            return;
        }

        let ty = self.arena.ty(varying).clone();
        let name = match &self.arena.node(varying).kind {
            NodeKind::Symbol { name, .. } => name.clone(),
            _ => return,
        };

        // The varying may have been declared before without a
        // register.
        for varying in &mut self.object.varyings {
            if varying.name == name {
                if register >= 0 {
                    debug_assert!(varying.register < 0 || varying.register == register);
                    varying.register = register;
                }
                return;
            }
        }

        self.object.varyings.push(Varying {
            ty: reflection::variable_type(&ty),
            name,
            array_size: ty.array_size,
            register,
            column: 0,
        });
    }

    fn uniform_register(&mut self, uniform: NodeId) -> u32 {
        let ty = self.arena.ty(uniform).clone();
        debug_assert!(!ty.basic.is_sampler());

        let name = match &self.arena.node(uniform).kind {
            NodeKind::Symbol { name, .. } => name.clone(),
            _ => return 0,
        };

        if let Some(index) = self.lookup_in(VariableFile::Uniforms, uniform) {
            return index;
        }

        let index = self.allocate_in(VariableFile::Uniforms, uniform);
        self.declare_uniform(&ty, &name, index);
        index
    }

    fn attribute_register(&mut self, attribute: NodeId) -> u32 {
        let ty = self.arena.ty(attribute).clone();
        debug_assert!(!ty.is_array());
        debug_assert_eq!(ty.basic, BasicType::Float);

        if let Some(index) = self.lookup_in(VariableFile::Attributes, attribute) {
            return index;
        }

        let name = match &self.arena.node(attribute).kind {
            NodeKind::Symbol { name, .. } => name.clone(),
            _ => return 0,
        };

        let index = self.allocate_in(VariableFile::Attributes, attribute);
        let register_count = ty.total_register_count();
        let line = self.arena.node(attribute).line;

        if self.object.is_vertex() {
            if index + register_count <= MAX_INPUT_ATTRIBUTES as u32 {
                let vertex = self.object.vertex_mut().unwrap();
                for i in 0..register_count {
                    vertex.input[(index + i) as usize] =
                        Semantic::new(Usage::TexCoord, (index + i) as u8);
                }
            } else {
                self.context.error(
                    line,
                    "Too many vertex attributes",
                    "vertex shader",
                );
                return 0;
            }
        }

        self.object.active_attributes.push(Attribute {
            ty: reflection::variable_type(&ty),
            name,
            array_size: 0,
            location: -1,
            register_index: index,
        });

        index
    }

    fn sampler_register(&mut self, sampler: NodeId) -> u32 {
        let kind = self.arena.node(sampler).kind.clone();
        let ty = self.arena.ty(sampler).clone();
        debug_assert!(ty.basic.is_sampler());

        match kind {
            NodeKind::Symbol { name, .. } => {
                if let Some(index) = self.lookup_in(VariableFile::Samplers, sampler) {
                    return index;
                }

                let index = self.allocate_in(VariableFile::Samplers, sampler);
                self.object.active_uniforms.push(Uniform {
                    ty: reflection::variable_type(&ty),
                    precision: reflection::variable_precision(&ty),
                    name,
                    array_size: ty.array_size,
                    register_index: index,
                });

                for i in 0..ty.total_register_count() {
                    self.object.shader_mut().declare_sampler(index + i);
                }

                index
            }
            NodeKind::Binary { op, left, .. } => {
                debug_assert!(matches!(
                    op,
                    BinaryOp::IndexDirect | BinaryOp::IndexIndirect
                ));
                // The element index is added by argument().
                self.sampler_register(left)
            }
            _ => unreachable!("sampler operand shape"),
        }
    }

    fn declare_uniform(&mut self, ty: &Type, name: &str, register_index: u32) {
        if !ty.is_struct() {
            self.object.active_uniforms.push(Uniform {
                ty: reflection::variable_type(ty),
                precision: reflection::variable_precision(ty),
                name: name.to_owned(),
                array_size: ty.array_size,
                register_index,
            });
        } else if ty.is_array() {
            let mut element_index = register_index;

            for i in 0..ty.array_size {
                for field in &ty.fields {
                    let uniform_name = format!("{}[{}].{}", name, i, field.name);
                    self.declare_uniform(&field.ty, &uniform_name, element_index);
                    element_index += field.ty.total_register_count();
                }
            }
        } else {
            let mut field_index = register_index;

            for field in &ty.fields {
                let uniform_name = format!("{}.{}", name, field.name);
                self.declare_uniform(&field.ty, &uniform_name, field_index);
                field_index += field.ty.total_register_count();
            }
        }
    }

    // ------------------------------------------------------------------
    // Variable arrays
    // ------------------------------------------------------------------

    fn list(&self, file: VariableFile) -> &Vec<Option<NodeId>> {
        match file {
            VariableFile::Temporaries => &self.temporaries,
            VariableFile::Uniforms => &self.uniforms,
            VariableFile::Varyings => &self.varyings,
            VariableFile::Attributes => &self.attributes,
            VariableFile::Samplers => &self.samplers,
        }
    }

    fn list_mut(&mut self, file: VariableFile) -> &mut Vec<Option<NodeId>> {
        match file {
            VariableFile::Temporaries => &mut self.temporaries,
            VariableFile::Uniforms => &mut self.uniforms,
            VariableFile::Varyings => &mut self.varyings,
            VariableFile::Attributes => &mut self.attributes,
            VariableFile::Samplers => &mut self.samplers,
        }
    }

    fn lookup_in(&self, file: VariableFile, variable: NodeId) -> Option<u32> {
        let list = self.list(file);

        for (i, slot) in list.iter().enumerate() {
            if *slot == Some(variable) {
                return Some(i as u32);
            }
        }

        if let NodeKind::Symbol { id, .. } = self.arena.node(variable).kind {
            for (i, slot) in list.iter().enumerate() {
                if let Some(other) = slot {
                    if let NodeKind::Symbol { id: other_id, .. } = self.arena.node(*other).kind {
                        if id == other_id {
                            return Some(i as u32);
                        }
                    }
                }
            }
        }

        None
    }

    fn allocate_in(&mut self, file: VariableFile, variable: NodeId) -> u32 {
        if let Some(index) = self.lookup_in(file, variable) {
            return index;
        }

        let register_count = self.arena.ty(variable).total_register_count() as usize;
        let list = self.list_mut(file);

        // First fit: find a free run of the required length.
        let mut i = 0;
        while i < list.len() {
            if list[i].is_none() {
                let mut j = 1;
                while j < register_count && i + j < list.len() {
                    if list[i + j].is_some() {
                        break;
                    }
                    j += 1;
                }

                if j == register_count {
                    for slot in list.iter_mut().skip(i).take(register_count) {
                        *slot = Some(variable);
                    }
                    return i as u32;
                }
            }
            i += 1;
        }

        let index = list.len() as u32;
        for _ in 0..register_count {
            list.push(Some(variable));
        }
        index
    }

    fn free_in(&mut self, file: VariableFile, variable: NodeId) {
        if let Some(index) = self.lookup_in(file, variable) {
            let register_count = self.arena.ty(variable).total_register_count() as usize;
            let list = self.list_mut(file);
            for slot in list.iter_mut().skip(index as usize).take(register_count) {
                *slot = None;
            }
        }
    }

    // ------------------------------------------------------------------
    // Synthetic nodes
    // ------------------------------------------------------------------

    fn new_temporary(&mut self) -> NodeId {
        let id = self.arena.fresh_symbol_id();
        self.arena.add(Node {
            kind: NodeKind::Symbol {
                name: "tmp".to_owned(),
                id,
            },
            ty: Type::float(4, Qualifier::Temporary),
            line: 0,
        })
    }

    fn free_temporary(&mut self, temporary: NodeId) {
        self.free_in(VariableFile::Temporaries, temporary);
    }

    fn constant4(&mut self, x: f32, y: f32, z: f32, w: f32) -> NodeId {
        self.arena.add(Node {
            kind: NodeKind::Constant(vec![
                ConstantValue::Float(x),
                ConstantValue::Float(y),
                ConstantValue::Float(z),
                ConstantValue::Float(w),
            ]),
            ty: Type {
                basic: BasicType::Float,
                precision: Precision::High,
                qualifier: Qualifier::Const,
                nominal_size: 4,
                matrix: false,
                array_size: 0,
                fields: Vec::new(),
            },
            line: 0,
        })
    }

    fn constant_bool(&mut self, value: bool) -> NodeId {
        self.arena.add(Node {
            kind: NodeKind::Constant(vec![ConstantValue::Bool(value)]),
            ty: Type::of(BasicType::Bool, 1, Qualifier::Const),
            line: 0,
        })
    }

    fn constant_int(&mut self, value: i32) -> NodeId {
        self.arena.add(Node {
            kind: NodeKind::Constant(vec![ConstantValue::Int(value)]),
            ty: Type::of(BasicType::Int, 1, Qualifier::Const),
            line: 0,
        })
    }

    // ------------------------------------------------------------------
    // Tree inspection helpers
    // ------------------------------------------------------------------

    fn constant_components(&self, node: NodeId) -> Vec<ConstantValue> {
        match &self.arena.node(node).kind {
            NodeKind::Constant(values) => values.clone(),
            _ => panic!("constant operand expected"),
        }
    }

    fn constant_int_value(&self, node: NodeId) -> i32 {
        self.constant_components(node)[0].as_int()
    }

    /// The constant boolean value of a condition, if it is constant.
    fn constant_bool_of(&self, node: NodeId) -> Option<bool> {
        match &self.arena.node(node).kind {
            NodeKind::Constant(values) => Some(values[0].as_bool()),
            _ => None,
        }
    }

    fn field_name(&self, node: NodeId) -> String {
        match &self.arena.node(node).kind {
            NodeKind::Symbol { name, .. } => name.clone(),
            _ => panic!("field selector expected"),
        }
    }

    fn aggregate_name(&self, node: NodeId) -> String {
        match &self.arena.node(node).kind {
            NodeKind::Aggregate { name, .. } => name.clone(),
            _ => panic!("aggregate expected"),
        }
    }

    /// Component selectors of a swizzle selector aggregate.
    fn swizzle_components(&self, node: NodeId) -> SmallVec<[u8; 4]> {
        match &self.arena.node(node).kind {
            NodeKind::Aggregate { args, .. } => args
                .iter()
                .map(|&arg| self.constant_int_value(arg) as u8)
                .collect(),
            NodeKind::Constant(values) => {
                values.iter().map(|value| value.as_int() as u8).collect()
            }
            _ => panic!("swizzle selector expected"),
        }
    }

    /// Packed swizzle byte of a selector aggregate.
    fn swizzle_literal(&self, node: NodeId) -> u8 {
        let mut swizzle = 0u8;
        for (component, selector) in self.swizzle_components(node).iter().enumerate() {
            swizzle |= selector << (component * 2);
        }
        swizzle
    }

    fn dim(&self, node: NodeId) -> usize {
        let ty = self.arena.ty(node);
        debug_assert!(ty.is_register());
        usize::from(ty.nominal_size)
    }

    fn dim2(&self, node: NodeId) -> usize {
        let ty = self.arena.ty(node);
        debug_assert!(ty.is_matrix() && !ty.is_array());
        usize::from(ty.nominal_size)
    }

    fn find_function(&self, name: &str) -> Option<&FunctionEntry> {
        self.functions.iter().find(|function| function.name == name)
    }

    /// Parameter symbols of a function definition: the first child is
    /// the parameters aggregate.
    fn function_parameters(&self, args: &[NodeId]) -> Vec<NodeId> {
        if let Some(&first) = args.first() {
            if let NodeKind::Aggregate {
                op: AggregateOp::Parameters,
                args,
                ..
            } = &self.arena.node(first).kind
            {
                return args.clone();
            }
        }
        Vec::new()
    }

    // ------------------------------------------------------------------
    // Triviality scoring
    // ------------------------------------------------------------------

    /// Conservatively checks whether an expression is fast to compute
    /// and has no side effects.
    fn trivial(&self, expression: NodeId, budget: i32) -> bool {
        if !self.arena.ty(expression).is_register() {
            return false;
        }

        self.cost(expression, budget) >= 0
    }

    /// Returns the remaining computing budget; negative means too
    /// expensive or side-effecting.
    fn cost(&self, expression: NodeId, budget: i32) -> i32 {
        if budget < 0 {
            return budget;
        }

        match &self.arena.node(expression).kind {
            NodeKind::Symbol { .. } | NodeKind::Constant(_) => budget,
            NodeKind::Binary { op, left, right } => match op {
                BinaryOp::VectorSwizzle | BinaryOp::IndexDirect | BinaryOp::IndexDirectStruct => {
                    self.cost(*left, budget)
                }
                BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul => {
                    self.cost(*left, self.cost(*right, budget - 1))
                }
                _ => -1,
            },
            NodeKind::Unary { op, operand } => match op {
                UnaryOp::Abs | UnaryOp::Negative => self.cost(*operand, budget - 1),
                _ => -1,
            },
            NodeKind::Selection {
                condition,
                true_block,
                false_block,
                ternary: true,
            } => {
                let (true_block, false_block) = match (true_block, false_block) {
                    (Some(t), Some(f)) => (*t, *f),
                    _ => return -1,
                };

                if let Some(value) = self.constant_bool_of(*condition) {
                    let taken = if value { true_block } else { false_block };
                    self.cost(taken, budget)
                } else {
                    self.cost(true_block, self.cost(false_block, budget - 2))
                }
            }
            _ => -1,
        }
    }

    // ------------------------------------------------------------------
    // Loop analysis
    // ------------------------------------------------------------------

    /// Iteration count of loops of the form
    /// `for (int i = initial; i < limit; i += increment)`.
    /// `None` means the count is not statically known.
    fn loop_count(&self, id: NodeId) -> Option<u32> {
        let (init, condition, expression) = match &self.arena.node(id).kind {
            NodeKind::Loop {
                init,
                condition,
                expression,
                ..
            } => (*init, *condition, *expression),
            _ => return None,
        };

        // Index symbol and initial value.
        let (index_id, initial) = self.loop_induction(init?)?;

        // Comparator and limit.
        let (comparator, limit) = {
            let test = condition?;
            match &self.arena.node(test).kind {
                NodeKind::Binary { op, left, right } => {
                    let left_id = match self.arena.node(*left).kind {
                        NodeKind::Symbol { id, .. } => id,
                        _ => return None,
                    };
                    if left_id != index_id {
                        return None;
                    }
                    match &self.arena.node(*right).kind {
                        NodeKind::Constant(values)
                            if self.arena.ty(*right).basic == BasicType::Int
                                && self.arena.ty(*right).nominal_size == 1 =>
                        {
                            (*op, values[0].as_int())
                        }
                        _ => return None,
                    }
                }
                _ => return None,
            }
        };

        // Increment.
        let increment = self.loop_increment(expression?)?;
        if increment == 0 {
            return None;
        }

        let (comparator, limit) = match comparator {
            BinaryOp::LessThanEqual => (BinaryOp::LessThan, limit + 1),
            comparator => (comparator, limit),
        };

        if comparator == BinaryOp::LessThan {
            let iterations = (limit - initial) / increment;
            Some(iterations.max(0) as u32)
        } else {
            None
        }
    }

    fn loop_induction(&self, init: NodeId) -> Option<(u32, i32)> {
        let sequence = match &self.arena.node(init).kind {
            NodeKind::Aggregate { args, .. } => args.clone(),
            _ => return None,
        };
        let variable = *sequence.first()?;

        if self.arena.ty(variable).qualifier != Qualifier::Temporary {
            return None;
        }

        if let NodeKind::Binary {
            op: BinaryOp::Initialize,
            left,
            right,
        } = self.arena.node(variable).kind
        {
            let symbol = match self.arena.node(left).kind {
                NodeKind::Symbol { id, .. } => id,
                _ => return None,
            };
            match &self.arena.node(right).kind {
                NodeKind::Constant(values)
                    if self.arena.ty(right).basic == BasicType::Int
                        && self.arena.ty(right).nominal_size == 1 =>
                {
                    Some((symbol, values[0].as_int()))
                }
                _ => None,
            }
        } else {
            None
        }
    }

    fn loop_increment(&self, expression: NodeId) -> Option<i32> {
        match &self.arena.node(expression).kind {
            NodeKind::Binary { op, right, .. } => {
                let value = match &self.arena.node(*right).kind {
                    NodeKind::Constant(values)
                        if self.arena.ty(*right).basic == BasicType::Int
                            && self.arena.ty(*right).nominal_size == 1 =>
                    {
                        values[0].as_int()
                    }
                    _ => return None,
                };
                match op {
                    BinaryOp::AddAssign => Some(value),
                    BinaryOp::SubAssign => Some(-value),
                    _ => None,
                }
            }
            NodeKind::Unary { op, .. } => match op {
                UnaryOp::PostIncrement | UnaryOp::PreIncrement => Some(1),
                UnaryOp::PostDecrement | UnaryOp::PreDecrement => Some(-1),
                _ => None,
            },
            _ => None,
        }
    }

    /// Whether the loop body can leave the loop early. Kill does not
    /// count; it ends the invocation, not the loop.
    fn detect_loop_discontinuity(&self, id: NodeId) -> bool {
        let mut detector = DiscontinuityDetector {
            arena: self.arena,
            loop_depth: 0,
            found: false,
        };
        detector.scan(id);
        detector.found
    }
}

struct DiscontinuityDetector<'a> {
    arena: &'a Arena,
    loop_depth: u32,
    found: bool,
}

impl<'a> DiscontinuityDetector<'a> {
    fn scan(&mut self, id: NodeId) {
        if self.found {
            return;
        }

        match &self.arena.node(id).kind {
            NodeKind::Loop {
                init,
                condition,
                expression,
                body,
                ..
            } => {
                self.loop_depth += 1;
                for child in [*init, *condition, *expression, *body].into_iter().flatten() {
                    self.scan(child);
                }
                self.loop_depth -= 1;
            }
            NodeKind::Branch { op, expression } => {
                if self.loop_depth > 0 {
                    match op {
                        BranchOp::Kill => {}
                        BranchOp::Break | BranchOp::Continue | BranchOp::Return => {
                            self.found = true;
                        }
                    }
                }
                if let Some(expression) = expression {
                    self.scan(*expression);
                }
            }
            NodeKind::Binary { left, right, .. } => {
                self.scan(*left);
                self.scan(*right);
            }
            NodeKind::Unary { operand, .. } => self.scan(*operand),
            NodeKind::Aggregate { args, .. } => {
                for &arg in args {
                    self.scan(arg);
                }
            }
            NodeKind::Selection {
                condition,
                true_block,
                false_block,
                ..
            } => {
                self.scan(*condition);
                for child in [*true_block, *false_block].into_iter().flatten() {
                    self.scan(child);
                }
            }
            NodeKind::Symbol { .. } | NodeKind::Constant(_) => {}
        }
    }
}

/// Components occupied by register `registers` of a value of `ty`,
/// counted from the start of the object. Used to index into constant
/// unions.
fn component_count(ty: &Type, registers: u32) -> u32 {
    if registers == 0 {
        return 0;
    }

    if ty.is_array() && registers >= ty.element_register_count() {
        let index = registers / ty.element_register_count();
        let remainder = registers - index * ty.element_register_count();
        return index * ty.element_size() + component_count(&element_of(ty), remainder);
    }

    if ty.is_struct() {
        let mut registers = registers;
        let mut elements = 0;
        for field in &ty.fields {
            if field.ty.total_register_count() <= registers {
                registers -= field.ty.total_register_count();
                elements += field.ty.object_size();
            } else {
                return elements + component_count(&field.ty, registers);
            }
        }
        elements
    } else if ty.is_matrix() {
        registers * u32::from(ty.nominal_size)
    } else {
        debug_assert!(registers == 0);
        0
    }
}

/// Nominal size of register `registers` within a value of `ty`.
fn register_size(ty: &Type, registers: u32) -> u32 {
    if registers == 0 {
        if ty.is_struct() {
            return register_size(&ty.fields[0].ty, 0);
        }
        return u32::from(ty.nominal_size);
    }

    if ty.is_array() && registers >= ty.element_register_count() {
        let index = registers / ty.element_register_count();
        let remainder = registers - index * ty.element_register_count();
        return register_size(&element_of(ty), remainder);
    }

    if ty.is_struct() {
        let mut registers = registers;
        for field in &ty.fields {
            if field.ty.total_register_count() <= registers {
                registers -= field.ty.total_register_count();
            } else {
                return register_size(&field.ty, registers);
            }
        }
        u32::from(ty.nominal_size)
    } else if ty.is_matrix() {
        register_size(ty, 0)
    } else {
        u32::from(ty.nominal_size)
    }
}

/// The element type of an array type.
fn element_of(ty: &Type) -> Type {
    let mut element = ty.clone();
    element.array_size = 0;
    element
}
