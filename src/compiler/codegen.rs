//! Lowering of the typed syntax tree to x86-64 SSE machine code
//!
//! Expressions are evaluated into [`Value`]s. A name evaluates to its own storage;
//! every operator places its result in the current [`TemporaryScope`] before
//! opening a nested scope for its operands, so local memory is always released
//! in the reverse order it was taken.
//!
//! Memory layout of values:
//!
//! ```text
//! float, int, bool   4 bytes
//! vec3, vec4         16 bytes, lane i at +4*i
//! mat3x3, mat4x4     rows of 16 bytes, row i at +16*i
//! ```

use super::context::ProgramContext;
use super::functions::{FunctionId, FunctionTable};
use super::layout::{register_of, Layout, PlacementPolicy, RegisterClass, RegisterLease, Region, TemporaryScope};
use super::symbols::{Location, SymbolId, SymbolKind, SymbolTable};
use super::x86::{op, reg, CodeBuffer, Condition, Opcode, Operand, PatchSite, Relocation};
use crate::error::{Error, Result};
use crate::parser::{
    BinaryOp, ElseBranch, Expr, ExprKind, FunctionDef, IfStatement, Item, Literal, Program,
    RelationalOp, Statement,
};
use crate::types::{result_of, ShaderType};
use std::collections::HashMap;
use tracing::{debug, trace};

const SIGN_MASK: [u32; 4] = [0x8000_0000; 4];
const XYZ_MASK: [u32; 4] = [!0, !0, !0, 0];
const LANE0_MASK: [u32; 4] = [!0, 0, 0, 0];

/// Machine code for one function
#[derive(Debug, Clone)]
pub struct GeneratedFunction {
    /// Function name
    pub name: String,
    /// Declared `export`
    pub export: bool,
    /// Code, starting with the call to the trampoline
    pub code: Vec<u8>,
    /// RIP-relative displacements into the object
    pub relocations: Vec<Relocation>,
    /// Offset of the trampoline call's rel32
    pub trampoline_call: usize,
    /// One line per instruction when listings are kept
    pub listing: Vec<String>,
}

/// Storage of one global variable
#[derive(Debug, Clone)]
pub struct GlobalSlot {
    /// Variable name
    pub name: String,
    /// Declared type
    pub ty: ShaderType,
    /// Memory offset or register
    pub location: Location,
    /// Global memory the trampoline loads a register-resident global from
    pub staging: Option<Location>,
    /// Injected by the stage context
    pub intrinsic: bool,
}

/// Initial bytes of a pooled constant
#[derive(Debug, Clone)]
pub struct ConstantData {
    /// Offset in the global region
    pub offset: u32,
    /// Little-endian contents
    pub bytes: Vec<u8>,
}

/// Everything the runtime object needs to lay out a shader
#[derive(Debug, Clone)]
pub struct GeneratedProgram {
    /// Every user function
    pub functions: Vec<GeneratedFunction>,
    /// Every global variable, intrinsics first
    pub globals: Vec<GlobalSlot>,
    /// Pooled constants
    pub constants: Vec<ConstantData>,
    /// Scalar constants and their offsets
    pub float_constants: Vec<(f32, u32)>,
    /// Vector constants and their offsets
    pub vector_constants: Vec<([f32; 4], u32)>,
    /// Bytes of global memory in use
    pub global_size: u32,
    /// Deepest local memory use of any function
    pub local_size: u32,
}

/// Move flavour for a value class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Width {
    /// mov r32
    Dword,
    /// movss
    Single,
    /// movups
    Packed,
}

impl Width {
    fn of(ty: ShaderType) -> Width {
        match ty {
            ShaderType::Int | ShaderType::Bool => Width::Dword,
            ShaderType::Float => Width::Single,
            _ => Width::Packed,
        }
    }

    fn opcodes(self) -> (&'static Opcode, &'static Opcode, RegisterClass) {
        match self {
            Width::Dword => (&op::MOV_LOAD, &op::MOV_STORE, RegisterClass::General),
            Width::Single => (&op::MOVSS_LOAD, &op::MOVSS_STORE, RegisterClass::Simd),
            Width::Packed => (&op::MOVUPS_LOAD, &op::MOVUPS_STORE, RegisterClass::Simd),
        }
    }
}

/// Register vector spilled so it can be indexed dynamically
#[derive(Debug, Clone, Copy)]
struct WriteBack {
    register: Location,
    spill: Location,
}

/// Global scratch words used around `idiv`
#[derive(Debug, Clone, Copy)]
struct DivisionSlots {
    eax: Location,
    edx: Location,
    divisor: Location,
}

/// Result of evaluating an expression
#[derive(Debug)]
struct Value {
    location: Location,
    ty: ShaderType,
    lease: Option<RegisterLease>,
    write_back: Option<WriteBack>,
}

impl Value {
    fn at(location: Location, ty: ShaderType) -> Self {
        Value {
            location,
            ty,
            lease: None,
            write_back: None,
        }
    }

    /// Same storage without ownership of its address register
    fn view(&self) -> Value {
        Value::at(self.location, self.ty)
    }
}

/// Emits machine code for every function of a parsed program
pub struct CodeGenerator {
    symbols: SymbolTable,
    functions: FunctionTable,
    context: ProgramContext,
    policy: PlacementPolicy,
    keep_listing: bool,
    layout: Layout,
    code: CodeBuffer,
    function: Option<FunctionId>,
    float_constants: HashMap<u32, u32>,
    vector_constants: HashMap<[u32; 4], u32>,
    constant_order: Vec<(u32, [u32; 4], bool)>,
    constant_names: HashMap<u32, String>,
    division_slots: Option<DivisionSlots>,
}

impl CodeGenerator {
    /// Creates a generator over the tables produced by the parser
    pub fn new(
        symbols: SymbolTable,
        functions: FunctionTable,
        context: ProgramContext,
        policy: PlacementPolicy,
        keep_listing: bool,
    ) -> Self {
        CodeGenerator {
            symbols,
            functions,
            context,
            policy,
            keep_listing,
            layout: Layout::new(),
            code: CodeBuffer::new(keep_listing),
            function: None,
            float_constants: HashMap::new(),
            vector_constants: HashMap::new(),
            constant_order: Vec::new(),
            constant_names: HashMap::new(),
            division_slots: None,
        }
    }

    /// Lays out globals and generates every function
    pub fn generate(mut self, program: &Program) -> Result<GeneratedProgram> {
        let globals = self.place_globals()?;
        debug!(
            globals = globals.len(),
            bytes = self.layout.global_size(),
            "globals placed"
        );

        let mut functions = Vec::new();
        for item in &program.items {
            if let Item::Function(def) = item {
                functions.push(self.generate_function(def)?);
            }
        }

        let mut constants = Vec::new();
        let mut float_constants = Vec::new();
        let mut vector_constants = Vec::new();
        for (offset, bits, scalar) in &self.constant_order {
            if *scalar {
                constants.push(ConstantData {
                    offset: *offset,
                    bytes: bits[0].to_le_bytes().to_vec(),
                });
                float_constants.push((f32::from_bits(bits[0]), *offset));
            } else {
                constants.push(ConstantData {
                    offset: *offset,
                    bytes: bits.iter().flat_map(|b| b.to_le_bytes()).collect(),
                });
                vector_constants.push((bits.map(f32::from_bits), *offset));
            }
        }

        Ok(GeneratedProgram {
            functions,
            globals,
            constants,
            float_constants,
            vector_constants,
            global_size: self.layout.global_size(),
            local_size: self.layout.local_size(),
        })
    }

    fn place_globals(&mut self) -> Result<Vec<GlobalSlot>> {
        let ids: Vec<SymbolId> = self.symbols.globals().collect();
        let mut slots = Vec::new();

        for id in ids {
            let symbol = self.symbols.get(id);
            if symbol.kind != SymbolKind::Variable {
                continue;
            }
            let name = symbol.name.clone();
            let ty = symbol.ty;
            let intrinsic = symbol.intrinsic;

            let in_memory =
                self.policy == PlacementPolicy::MemoryFirst || self.context.is_output(&name);
            let location = if in_memory {
                self.layout.place_in_memory(ty, Region::Global)?
            } else {
                self.layout.place(ty, Region::Global)?
            };
            let staging = location
                .is_register()
                .then(|| self.layout.allocate_global(16));

            self.symbols.get_mut(id).location = location;
            slots.push(GlobalSlot {
                name,
                ty,
                location,
                staging,
                intrinsic,
            });
        }

        Ok(slots)
    }

    fn generate_function(&mut self, def: &FunctionDef) -> Result<GeneratedFunction> {
        self.code = CodeBuffer::new(self.keep_listing);
        self.function = Some(def.id);

        let mut frame = self.layout.scope();
        let function = self.functions.get(def.id);
        let parameters = function.parameters.clone();
        let locals = function.locals.clone();
        let export = function.export;

        for parameter in parameters {
            let location = frame.place(self.symbols.get(parameter).ty)?;
            self.symbols.get_mut(parameter).location = location;
        }
        for local in locals {
            let ty = self.symbols.get(local).ty;
            let location = match self.policy {
                PlacementPolicy::MemoryFirst => frame.place_in_memory(ty)?,
                PlacementPolicy::RegisterFirst => frame.place(ty)?,
            };
            self.symbols.get_mut(local).location = location;
        }

        let trampoline_call = self.code.call_placeholder("trampoline");
        self.statements(&def.body)?;
        self.code.ret();
        drop(frame);

        let buffer = std::mem::replace(&mut self.code, CodeBuffer::new(false));
        let (code, relocations, listing) = buffer.finish();
        debug!(function = %def.name, bytes = code.len(), "function generated");
        if !listing.is_empty() {
            trace!(function = %def.name, "\n{}", listing.join("\n"));
        }

        self.function = None;
        Ok(GeneratedFunction {
            name: def.name.clone(),
            export,
            code,
            relocations,
            trampoline_call,
            listing,
        })
    }

    // Statements

    fn statements(&mut self, body: &[Statement]) -> Result<()> {
        for statement in body {
            self.statement(statement)?;
        }
        Ok(())
    }

    fn statement(&mut self, statement: &Statement) -> Result<()> {
        match statement {
            Statement::LocalVariable {
                symbol,
                initializer,
            } => {
                if let Some(initializer) = initializer {
                    let (location, ty) = {
                        let symbol = self.symbols.get(*symbol);
                        (symbol.location, symbol.ty)
                    };
                    let mut scope = self.layout.scope();
                    let value = self.evaluate(initializer, &mut scope)?;
                    self.store(location, ty, &value)?;
                    self.finish(value)?;
                }
                Ok(())
            }
            Statement::Expression(expr) => {
                let mut scope = self.layout.scope();
                let value = self.evaluate(expr, &mut scope)?;
                self.finish(value)?;
                Ok(())
            }
            Statement::If(statement) => self.if_statement(statement),
            Statement::While { .. } => Err(Error::malformed("'while' has no lowering")),
            Statement::For { .. } => Err(Error::malformed("'for' has no lowering")),
            Statement::Return { value } => {
                if let Some(value) = value {
                    let mut scope = self.layout.scope();
                    let value = self.evaluate(value, &mut scope)?;
                    self.finish(value)?;
                }
                self.code.ret();
                Ok(())
            }
        }
    }

    fn if_statement(&mut self, statement: &IfStatement) -> Result<()> {
        let skip = self.condition(&statement.condition)?;
        self.statements(&statement.then_branch)?;

        match &statement.else_branch {
            None => self.code.bind(skip),
            Some(branch) => {
                let end = self.code.jump();
                self.code.bind(skip)?;
                match branch {
                    ElseBranch::ElseIf(inner) => self.if_statement(inner)?,
                    ElseBranch::Else(body) => self.statements(body)?,
                }
                self.code.bind(end)
            }
        }
    }

    /// Emits a jump taken when `condition` is false
    fn condition(&mut self, condition: &Expr) -> Result<PatchSite> {
        let mut scope = self.layout.scope();

        let jump = match &condition.kind {
            ExprKind::Relational { op, lhs, rhs } => {
                let lhs = self.evaluate(lhs, &mut scope)?;
                let rhs = self.evaluate(rhs, &mut scope)?;
                let jump = self.compare(*op, &lhs, &rhs)?;
                self.finish(rhs)?;
                self.finish(lhs)?;
                jump
            }
            _ => {
                let value = self.evaluate(condition, &mut scope)?;
                self.emit_m(&op::CMP_IMM8, value.location, &[0])?;
                self.finish(value)?;
                Condition::Equal
            }
        };

        // restores above only touch registers, so the flags survive until here
        Ok(self.code.jump_if(jump))
    }

    fn compare(&mut self, op: RelationalOp, lhs: &Value, rhs: &Value) -> Result<Condition> {
        if lhs.ty.is_vector() || rhs.ty.is_vector() {
            return Err(Error::Unsupported {
                feature: "vector comparison".to_string(),
            });
        }

        if lhs.ty.is_integral() && rhs.ty.is_integral() {
            if lhs.location.is_register() {
                self.emit_rm(&op::CMP_LOAD, lhs.location, rhs.location)?;
            } else if rhs.location.is_register() {
                self.emit_mr(&op::CMP_STORE, lhs.location, rhs.location)?;
            } else {
                let scratch = self.acquire(RegisterClass::General, &[lhs.location, rhs.location])?;
                self.transfer(Width::Dword, scratch.location(), lhs.location)?;
                self.emit_rm(&op::CMP_LOAD, scratch.location(), rhs.location)?;
                self.release(scratch)?;
            }

            return Ok(match op {
                RelationalOp::Less => Condition::GreaterEqual,
                RelationalOp::LessEquals => Condition::Greater,
                RelationalOp::Greater => Condition::LessEqual,
                RelationalOp::GreaterEquals => Condition::Less,
                RelationalOp::Equals => Condition::NotEqual,
                RelationalOp::NotEquals => Condition::Equal,
            });
        }

        let avoid = [lhs.location, rhs.location];
        let (left, left_lease) =
            if lhs.ty == ShaderType::Float && lhs.location.is_register() {
                (lhs.location, None)
            } else {
                let scratch = self.acquire(RegisterClass::Simd, &avoid)?;
                self.store(scratch.location(), ShaderType::Float, lhs)?;
                (scratch.location(), Some(scratch))
            };
        let (right, right_lease) = self.float_operand(rhs, &[left, lhs.location, rhs.location])?;

        self.emit_rm(&op::COMISS, left, right)?;
        self.release_opt(right_lease)?;
        self.release_opt(left_lease)?;

        Ok(match op {
            RelationalOp::Less => Condition::AboveEqual,
            RelationalOp::LessEquals => Condition::Above,
            RelationalOp::Greater => Condition::BelowEqual,
            RelationalOp::GreaterEquals => Condition::Below,
            RelationalOp::Equals => Condition::NotEqual,
            RelationalOp::NotEquals => Condition::Equal,
        })
    }

    // Expressions

    fn evaluate(&mut self, expr: &Expr, scope: &mut TemporaryScope) -> Result<Value> {
        match &expr.kind {
            ExprKind::Literal(literal) => self.literal(*literal, scope),
            ExprKind::Name(symbol) => self.name_value(*symbol),
            ExprKind::Binary { op, lhs, rhs } => {
                let out = scope.place(expr.ty)?;
                let mut inner = self.layout.scope();
                let lhs = self.evaluate(lhs, &mut inner)?;
                let rhs = self.evaluate(rhs, &mut inner)?;
                self.binary(*op, out, expr.ty, &lhs, &rhs)?;
                self.finish(rhs)?;
                self.finish(lhs)?;
                Ok(Value::at(out, expr.ty))
            }
            ExprKind::Assign { op, target, value } => {
                let result = self.assign(*op, target, value, scope)?;
                self.materialize(result, scope)
            }
            ExprKind::Relational { op, .. } => Err(Error::malformed(format!(
                "relational operator '{}' outside an if condition",
                op
            ))),
            ExprKind::Negate(operand) => {
                let out = scope.place(expr.ty)?;
                let mut inner = self.layout.scope();
                let value = self.evaluate(operand, &mut inner)?;
                self.negate(out, &value)?;
                self.finish(value)?;
                Ok(Value::at(out, expr.ty))
            }
            ExprKind::Not(operand) => {
                let out = scope.place(expr.ty)?;
                let mut inner = self.layout.scope();
                let value = self.evaluate(operand, &mut inner)?;
                let (acc, lease) = self.accumulator(out, RegisterClass::General, &[out, value.location])?;
                self.transfer(Width::Dword, acc, value.location)?;
                self.emit_m(&op::XOR_IMM8, acc, &[1])?;
                self.settle(out, acc, lease, Width::Dword)?;
                self.finish(value)?;
                Ok(Value::at(out, expr.ty))
            }
            ExprKind::Subscript { base, index } => {
                let element = self.subscript(base, index, scope, false)?;
                self.materialize(element, scope)
            }
            ExprKind::Call {
                function,
                name,
                args,
            } => self.call(*function, name, args, expr.ty, scope),
        }
    }

    /// Evaluates an assignable expression to its storage
    fn target(&mut self, expr: &Expr, scope: &mut TemporaryScope) -> Result<Value> {
        match &expr.kind {
            ExprKind::Name(symbol) => self.name_value(*symbol),
            ExprKind::Subscript { base, index } => self.subscript(base, index, scope, true),
            _ => self.evaluate(expr, scope),
        }
    }

    fn literal(&mut self, literal: Literal, scope: &mut TemporaryScope) -> Result<Value> {
        match literal {
            Literal::Float(value) => Ok(Value::at(self.float_constant(value), ShaderType::Float)),
            Literal::Int(value) => {
                let out = scope.place(ShaderType::Int)?;
                self.emit_m(&op::MOV_IMM, out, &value.to_le_bytes())?;
                Ok(Value::at(out, ShaderType::Int))
            }
            Literal::Bool(value) => {
                let out = scope.place(ShaderType::Bool)?;
                self.emit_m(&op::MOV_IMM, out, &(value as i32).to_le_bytes())?;
                Ok(Value::at(out, ShaderType::Bool))
            }
        }
    }

    fn name_value(&self, symbol: SymbolId) -> Result<Value> {
        let symbol = self.symbols.get(symbol);
        if symbol.kind == SymbolKind::Function || !symbol.location.is_placed() {
            return Err(Error::malformed(format!(
                "'{}' has no storage",
                symbol.name
            )));
        }
        Ok(Value::at(symbol.location, symbol.ty))
    }

    fn assign(
        &mut self,
        op: Option<BinaryOp>,
        target: &Expr,
        value: &Expr,
        scope: &mut TemporaryScope,
    ) -> Result<Value> {
        let mut dest = self.target(target, scope)?;

        let mut inner = self.layout.scope();
        let source = self.evaluate(value, &mut inner)?;
        match op {
            None => self.store(dest.location, target.ty, &source)?,
            Some(op) => {
                let current = self.materialize(dest.view(), &mut inner)?;
                let ty = result_of(target.ty, value.ty);
                let result = inner.place(ty)?;
                self.binary(op, result, ty, &current, &source)?;
                self.store(dest.location, target.ty, &Value::at(result, ty))?;
            }
        }
        self.finish(source)?;
        drop(inner);

        if let Some(write_back) = dest.write_back.take() {
            self.transfer(Width::Packed, write_back.register, write_back.spill)?;
        }
        Ok(dest)
    }

    fn subscript(
        &mut self,
        base: &Expr,
        index: &Expr,
        scope: &mut TemporaryScope,
        assignable: bool,
    ) -> Result<Value> {
        let container = if assignable {
            self.target(base, scope)?
        } else {
            self.evaluate(base, scope)?
        };
        let element = container
            .ty
            .element()
            .ok_or_else(|| Error::malformed(format!("'{}' cannot be subscripted", container.ty)))?;
        let stride = container.ty.stride();
        let constant = match index.kind {
            ExprKind::Literal(Literal::Int(k)) if k >= 0 && (k as u32) < container.ty.element_count() => {
                Some(k as u32)
            }
            _ => None,
        };

        match (container.location, constant) {
            (Location::SimdRegister(simd), Some(k)) => Ok(Value::at(
                Location::RegisterLane {
                    simd,
                    shift: (k * 4) as u8,
                },
                element,
            )),
            (Location::SimdRegister(_), None) => {
                let spill = scope.place_in_memory(container.ty)?;
                self.transfer(Width::Packed, spill, container.location)?;
                let mut value =
                    self.index_memory(Value::at(spill, container.ty), index, stride, element, scope)?;
                if assignable {
                    value.write_back = Some(WriteBack {
                        register: container.location,
                        spill,
                    });
                }
                Ok(value)
            }
            (Location::GlobalMemory(_) | Location::LocalMemory(_), Some(k)) => Ok(Value {
                location: container.location.offset(k * stride),
                ty: element,
                lease: container.lease,
                write_back: container.write_back,
            }),
            (Location::IndirectRegister(address), Some(k)) => {
                if k > 0 {
                    self.emit_m(&op::ADD_IMM64, Location::Register(address), &(k * stride).to_le_bytes())?;
                }
                Ok(Value {
                    location: container.location,
                    ty: element,
                    lease: container.lease,
                    write_back: container.write_back,
                })
            }
            (Location::GlobalMemory(_) | Location::LocalMemory(_) | Location::IndirectRegister(_), None) => {
                self.index_memory(container, index, stride, element, scope)
            }
            (other, _) => Err(Error::malformed(format!("cannot subscript value at {:?}", other))),
        }
    }

    /// Computes `&container + index * stride` into an address register
    fn index_memory(
        &mut self,
        container: Value,
        index: &Expr,
        stride: u32,
        element: ShaderType,
        scope: &mut TemporaryScope,
    ) -> Result<Value> {
        let index = self.evaluate(index, scope)?;
        let address = self.acquire(RegisterClass::General, &[index.location, container.location])?;
        let target = address.location();

        self.transfer(Width::Dword, target, index.location)?;
        self.emit_rm(&op::MOVSXD, target, target)?;
        self.emit_rm_imm(&op::IMUL_IMM64, target, target, &stride.to_le_bytes())?;

        match container.location {
            Location::IndirectRegister(base) => {
                self.emit_rm(&op::ADD64, target, Location::Register(base))?;
            }
            _ => {
                let base = self.acquire(RegisterClass::General, &[target, index.location, container.location])?;
                self.emit_rm(&op::LEA, base.location(), container.location)?;
                self.emit_rm(&op::ADD64, target, base.location())?;
                self.release(base)?;
            }
        }

        self.finish(index)?;
        self.finish(container)?;
        Ok(Value {
            location: Location::IndirectRegister(address.id()),
            ty: element,
            lease: Some(address),
            write_back: None,
        })
    }

    /// Copies a register lane into a scalar slot
    fn materialize(&mut self, value: Value, scope: &mut TemporaryScope) -> Result<Value> {
        let Location::RegisterLane { simd, shift } = value.location else {
            return Ok(value);
        };

        let out = scope.place(ShaderType::Float)?;
        let (acc, lease) = self.accumulator(out, RegisterClass::Simd, &[out, value.location])?;
        self.emit_rm(&op::MOVUPS_LOAD, acc, Location::SimdRegister(simd))?;
        if shift > 0 {
            self.emit_m(&op::PSRLDQ, acc, &[shift])?;
        }
        let mask = self.vector_constant(LANE0_MASK);
        self.emit_rm(&op::ANDPS, acc, mask)?;
        self.settle(out, acc, lease, Width::Single)?;

        self.finish(value)?;
        Ok(Value::at(out, ShaderType::Float))
    }

    fn write_lane(&mut self, lane: Location, value: &Value) -> Result<()> {
        let Location::RegisterLane { simd, shift } = lane else {
            return Err(Error::malformed("expected a register lane"));
        };

        let scratch = self.acquire(RegisterClass::Simd, &[lane, value.location])?;
        self.store(scratch.location(), ShaderType::Float, value)?;
        let keep = self.vector_constant(LANE0_MASK);
        self.emit_rm(&op::ANDPS, scratch.location(), keep)?;
        if shift > 0 {
            self.emit_m(&op::PSLLDQ, scratch.location(), &[shift])?;
        }

        let mut clear = [!0u32; 4];
        clear[(shift / 4) as usize & 3] = 0;
        let clear = self.vector_constant(clear);
        self.emit_rm(&op::ANDPS, Location::SimdRegister(simd), clear)?;
        self.emit_rm(&op::ORPS, Location::SimdRegister(simd), scratch.location())?;
        self.release(scratch)?;
        Ok(())
    }

    // Arithmetic

    fn binary(&mut self, op: BinaryOp, out: Location, ty: ShaderType, lhs: &Value, rhs: &Value) -> Result<()> {
        match op {
            BinaryOp::Multiply if lhs.ty.is_matrix() && rhs.ty.is_matrix() => {
                self.matrix_product(out, lhs, rhs)
            }
            BinaryOp::Multiply if lhs.ty.is_matrix() && rhs.ty.is_vector() => {
                self.matrix_vector(out, lhs, rhs)
            }
            _ if lhs.ty.is_vector() && rhs.ty.is_scalar() => self.vector_scalar(out, lhs, rhs),
            _ if lhs.ty.is_vector() => self.packed(op, out, lhs, rhs),
            _ if ty == ShaderType::Float => self.scalar_float(op, out, lhs, rhs),
            BinaryOp::Divide => self.integer_division(out, lhs, rhs),
            _ => self.scalar_int(op, out, lhs, rhs),
        }
    }

    fn packed(&mut self, op: BinaryOp, out: Location, lhs: &Value, rhs: &Value) -> Result<()> {
        let opcode = match op {
            BinaryOp::Add => &op::ADDPS,
            BinaryOp::Subtract => &op::SUBPS,
            _ => {
                return Err(Error::malformed(format!(
                    "'{}' is not defined between '{}' and '{}'",
                    op, lhs.ty, rhs.ty
                )))
            }
        };

        let rows = if lhs.ty.is_matrix() { lhs.ty.element_count() } else { 1 };
        for row in 0..rows {
            let (o, l, r) = (
                out.offset(row * 16),
                lhs.location.offset(row * 16),
                rhs.location.offset(row * 16),
            );
            let (acc, lease) = self.accumulator(o, RegisterClass::Simd, &[o, l, r])?;
            self.transfer(Width::Packed, acc, l)?;
            self.emit_rm(opcode, acc, r)?;
            self.settle(o, acc, lease, Width::Packed)?;
        }
        Ok(())
    }

    fn vector_scalar(&mut self, out: Location, lhs: &Value, rhs: &Value) -> Result<()> {
        let scalar = self.acquire(RegisterClass::Simd, &[out, lhs.location, rhs.location])?;
        self.store(scalar.location(), ShaderType::Float, rhs)?;
        self.emit_rm_imm(&op::SHUFPS, scalar.location(), scalar.location(), &[0])?;

        let (acc, lease) = self.accumulator(
            out,
            RegisterClass::Simd,
            &[out, lhs.location, rhs.location, scalar.location()],
        )?;
        self.transfer(Width::Packed, acc, lhs.location)?;
        self.emit_rm(&op::MULPS, acc, scalar.location())?;
        self.settle(out, acc, lease, Width::Packed)?;
        self.release(scalar)?;
        Ok(())
    }

    /// Each output lane is the dot product of one matrix row with the vector
    fn matrix_vector(&mut self, out: Location, matrix: &Value, vector: &Value) -> Result<()> {
        let rows = matrix.ty.element_count();
        let padded = matrix.ty.element() == Some(ShaderType::Vec3);
        let mut avoid = vec![out, matrix.location, vector.location];
        let mut leases = Vec::with_capacity(4);

        for _ in 0..4 {
            let lease = self.acquire(RegisterClass::Simd, &avoid)?;
            avoid.push(lease.location());
            leases.push(lease);
        }
        let r: Vec<Location> = leases.iter().map(|l| l.location()).collect();

        for row in 0..rows as usize {
            self.transfer(Width::Packed, r[row], matrix.location.offset(row as u32 * 16))?;
            self.emit_rm(&op::MULPS, r[row], vector.location)?;
            if padded {
                let mask = self.vector_constant(XYZ_MASK);
                self.emit_rm(&op::ANDPS, r[row], mask)?;
            }
        }
        if rows == 3 {
            self.emit_rm(&op::XORPS, r[3], r[3])?;
        }

        self.emit_rm(&op::HADDPS, r[0], r[1])?;
        self.emit_rm(&op::HADDPS, r[2], r[3])?;
        self.emit_rm(&op::HADDPS, r[0], r[2])?;
        self.transfer(Width::Packed, out, r[0])?;

        for lease in leases.into_iter().rev() {
            self.release(lease)?;
        }
        Ok(())
    }

    /// Row i of the product is the sum over j of `lhs[i][j] * rhs[j]`
    fn matrix_product(&mut self, out: Location, lhs: &Value, rhs: &Value) -> Result<()> {
        let rows = lhs.ty.element_count();
        let acc = self.acquire(RegisterClass::Simd, &[out, lhs.location, rhs.location])?;
        let term = self.acquire(
            RegisterClass::Simd,
            &[out, lhs.location, rhs.location, acc.location()],
        )?;
        let (a, t) = (acc.location(), term.location());

        for i in 0..rows {
            self.emit_rm(&op::XORPS, a, a)?;
            for j in 0..rows {
                self.emit_rm(&op::MOVSS_LOAD, t, lhs.location.offset(i * 16 + j * 4))?;
                self.emit_rm_imm(&op::SHUFPS, t, t, &[0])?;
                self.emit_rm(&op::MULPS, t, rhs.location.offset(j * 16))?;
                self.emit_rm(&op::ADDPS, a, t)?;
            }
            self.transfer(Width::Packed, out.offset(i * 16), a)?;
        }

        self.release(term)?;
        self.release(acc)?;
        Ok(())
    }

    fn scalar_float(&mut self, op: BinaryOp, out: Location, lhs: &Value, rhs: &Value) -> Result<()> {
        let opcode = match op {
            BinaryOp::Add => &op::ADDSS,
            BinaryOp::Subtract => &op::SUBSS,
            BinaryOp::Multiply => &op::MULSS,
            BinaryOp::Divide => &op::DIVSS,
        };

        let (acc, lease) =
            self.accumulator(out, RegisterClass::Simd, &[out, lhs.location, rhs.location])?;
        self.store(acc, ShaderType::Float, lhs)?;
        let (right, right_lease) = self.float_operand(rhs, &[acc, out, lhs.location, rhs.location])?;
        self.emit_rm(opcode, acc, right)?;
        self.release_opt(right_lease)?;
        self.settle(out, acc, lease, Width::Single)
    }

    fn scalar_int(&mut self, op: BinaryOp, out: Location, lhs: &Value, rhs: &Value) -> Result<()> {
        let opcode = match op {
            BinaryOp::Add => &op::ADD,
            BinaryOp::Subtract => &op::SUB,
            BinaryOp::Multiply => &op::IMUL,
            BinaryOp::Divide => return self.integer_division(out, lhs, rhs),
        };

        let (acc, lease) =
            self.accumulator(out, RegisterClass::General, &[out, lhs.location, rhs.location])?;
        self.transfer(Width::Dword, acc, lhs.location)?;
        self.emit_rm(opcode, acc, rhs.location)?;
        self.settle(out, acc, lease, Width::Dword)
    }

    /// `cdq; idiv` with eax and edx preserved around the sequence. The divisor is
    /// read from memory so no third register is needed.
    fn integer_division(&mut self, out: Location, lhs: &Value, rhs: &Value) -> Result<()> {
        let slots = self.division_slots();
        let eax = Location::Register(reg::EAX);
        let edx = Location::Register(reg::EDX);

        self.emit_mr(&op::MOV_STORE, slots.eax, eax)?;
        self.emit_mr(&op::MOV_STORE, slots.edx, edx)?;

        let divisor = if rhs.location.is_register() {
            self.emit_mr(&op::MOV_STORE, slots.divisor, rhs.location)?;
            slots.divisor
        } else {
            rhs.location
        };

        // a dividend held in edx was saved above and is still intact here
        self.transfer(Width::Dword, eax, lhs.location)?;
        self.code.cdq();
        self.emit_m(&op::IDIV, divisor, &[])?;

        if out.is_register() {
            self.emit_mr(&op::MOV_STORE, slots.divisor, eax)?;
            self.emit_rm(&op::MOV_LOAD, eax, slots.eax)?;
            self.emit_rm(&op::MOV_LOAD, edx, slots.edx)?;
            self.emit_rm(&op::MOV_LOAD, out, slots.divisor)
        } else {
            self.emit_mr(&op::MOV_STORE, out, eax)?;
            self.emit_rm(&op::MOV_LOAD, eax, slots.eax)?;
            self.emit_rm(&op::MOV_LOAD, edx, slots.edx)
        }
    }

    fn negate(&mut self, out: Location, value: &Value) -> Result<()> {
        if value.ty.is_integral() {
            let (acc, lease) = self.accumulator(out, RegisterClass::General, &[out, value.location])?;
            self.transfer(Width::Dword, acc, value.location)?;
            self.emit_m(&op::NEG, acc, &[])?;
            return self.settle(out, acc, lease, Width::Dword);
        }

        let width = Width::of(value.ty);
        let rows = if value.ty.is_matrix() { value.ty.element_count() } else { 1 };
        let mask = self.vector_constant(SIGN_MASK);

        for row in 0..rows {
            let (o, v) = (out.offset(row * 16), value.location.offset(row * 16));
            let (acc, lease) = self.accumulator(o, RegisterClass::Simd, &[o, v])?;
            self.transfer(width, acc, v)?;
            self.emit_rm(&op::XORPS, acc, mask)?;
            self.settle(o, acc, lease, width)?;
        }
        Ok(())
    }

    // Intrinsic functions

    fn call(
        &mut self,
        function: FunctionId,
        name: &str,
        args: &[Expr],
        ty: ShaderType,
        scope: &mut TemporaryScope,
    ) -> Result<Value> {
        if !self.functions.get(function).intrinsic {
            return Err(Error::Unsupported {
                feature: "function call".to_string(),
            });
        }

        let out = if ty == ShaderType::Void {
            Location::None
        } else {
            scope.place(ty)?
        };

        let mut inner = self.layout.scope();
        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            values.push(self.evaluate(arg, &mut inner)?);
        }

        match (name, values.as_slice()) {
            ("normalize", [v]) => self.normalize(out, v)?,
            ("length", [v]) => self.length(out, v)?,
            ("dot3", [a, b]) => self.dot3(out, a, b)?,
            ("max", [a, b]) => self.max(out, a, b)?,
            ("clamp", [x, lo, hi]) => self.clamp(out, x, lo, hi)?,
            ("nop", [_]) => {}
            _ => {
                return Err(Error::Unsupported {
                    feature: format!("intrinsic '{}'", name),
                })
            }
        }

        for value in values.into_iter().rev() {
            self.finish(value)?;
        }
        Ok(Value::at(out, ty))
    }

    /// Leaves the xyz dot product of `a` and `b` (or `a` with itself) in every lane of `acc`
    fn dot_product(&mut self, acc: Location, a: &Value, b: Option<&Value>) -> Result<()> {
        self.transfer(Width::Packed, acc, a.location)?;
        let rhs = b.map_or(acc, |b| b.location);
        self.emit_rm(&op::MULPS, acc, rhs)?;
        let mask = self.vector_constant(XYZ_MASK);
        self.emit_rm(&op::ANDPS, acc, mask)?;
        self.emit_rm(&op::HADDPS, acc, acc)?;
        self.emit_rm(&op::HADDPS, acc, acc)
    }

    fn normalize(&mut self, out: Location, v: &Value) -> Result<()> {
        let vector = self.acquire(RegisterClass::Simd, &[out, v.location])?;
        let scale = self.acquire(RegisterClass::Simd, &[out, v.location, vector.location()])?;
        let (x, s) = (vector.location(), scale.location());

        self.transfer(Width::Packed, x, v.location)?;
        self.dot_product(s, &Value::at(x, v.ty), None)?;
        self.emit_rm(&op::RSQRTPS, s, s)?;
        self.emit_rm(&op::MULPS, x, s)?;
        self.transfer(Width::Packed, out, x)?;

        self.release(scale)?;
        self.release(vector)?;
        Ok(())
    }

    fn length(&mut self, out: Location, v: &Value) -> Result<()> {
        let scratch = self.acquire(RegisterClass::Simd, &[out, v.location])?;
        let s = scratch.location();
        self.dot_product(s, v, None)?;
        self.emit_rm(&op::SQRTSS, s, s)?;
        self.transfer(Width::Single, out, s)?;
        self.release(scratch)?;
        Ok(())
    }

    fn dot3(&mut self, out: Location, a: &Value, b: &Value) -> Result<()> {
        let scratch = self.acquire(RegisterClass::Simd, &[out, a.location, b.location])?;
        let s = scratch.location();
        self.dot_product(s, a, Some(b))?;
        self.transfer(Width::Single, out, s)?;
        self.release(scratch)?;
        Ok(())
    }

    fn max(&mut self, out: Location, a: &Value, b: &Value) -> Result<()> {
        let (acc, lease) = self.accumulator(out, RegisterClass::Simd, &[out, a.location, b.location])?;
        self.store(acc, ShaderType::Float, a)?;
        let (right, right_lease) = self.float_operand(b, &[acc, out, a.location, b.location])?;
        self.emit_rm(&op::MAXSS, acc, right)?;
        self.release_opt(right_lease)?;
        self.settle(out, acc, lease, Width::Single)
    }

    fn clamp(&mut self, out: Location, x: &Value, lo: &Value, hi: &Value) -> Result<()> {
        let avoid = [out, x.location, lo.location, hi.location];
        let (acc, lease) = self.accumulator(out, RegisterClass::Simd, &avoid)?;
        self.store(acc, ShaderType::Float, x)?;

        let (low, low_lease) = self.float_operand(lo, &[acc, out, x.location, lo.location, hi.location])?;
        let (high, high_lease) =
            self.float_operand(hi, &[acc, low, out, x.location, lo.location, hi.location])?;

        self.emit_rm(&op::COMISS, acc, low)?;
        let above_low = self.code.short_jump_if(Condition::AboveEqual);
        self.emit_rm(&op::MOVSS_LOAD, acc, low)?;
        self.code.bind(above_low)?;

        self.emit_rm(&op::COMISS, acc, high)?;
        let below_high = self.code.short_jump_if(Condition::BelowEqual);
        self.emit_rm(&op::MOVSS_LOAD, acc, high)?;
        self.code.bind(below_high)?;

        self.release_opt(high_lease)?;
        self.release_opt(low_lease)?;
        self.settle(out, acc, lease, Width::Single)
    }

    // Moves

    /// Stores `value` into `dest`, converting between int and float
    fn store(&mut self, dest: Location, dest_ty: ShaderType, value: &Value) -> Result<()> {
        if matches!(dest, Location::RegisterLane { .. }) {
            return self.write_lane(dest, value);
        }

        match (dest_ty, value.ty) {
            (ShaderType::Float, ShaderType::Int) => {
                let (acc, lease) = self.accumulator(dest, RegisterClass::Simd, &[dest, value.location])?;
                self.emit_rm(&op::CVTSI2SS, acc, value.location)?;
                self.settle(dest, acc, lease, Width::Single)
            }
            (ShaderType::Int, ShaderType::Float) => {
                let (acc, lease) =
                    self.accumulator(dest, RegisterClass::General, &[dest, value.location])?;
                self.emit_rm(&op::CVTTSS2SI, acc, value.location)?;
                self.settle(dest, acc, lease, Width::Dword)
            }
            _ if dest_ty.is_matrix() => {
                for row in 0..dest_ty.element_count() {
                    self.transfer(
                        Width::Packed,
                        dest.offset(row * 16),
                        value.location.offset(row * 16),
                    )?;
                }
                Ok(())
            }
            _ => self.transfer(Width::of(dest_ty), dest, value.location),
        }
    }

    /// Same-class move between any two locations
    fn transfer(&mut self, width: Width, dest: Location, src: Location) -> Result<()> {
        if dest == src {
            return Ok(());
        }
        let (load, store, class) = width.opcodes();

        if dest.is_register() {
            self.emit_rm(load, dest, src)
        } else if src.is_register() {
            self.emit_mr(store, dest, src)
        } else {
            let scratch = self.acquire(class, &[dest, src])?;
            self.emit_rm(load, scratch.location(), src)?;
            self.emit_mr(store, dest, scratch.location())?;
            self.release(scratch)?;
            Ok(())
        }
    }

    /// `out` itself when it is a register of `class`, a leased register otherwise
    fn accumulator(
        &mut self,
        out: Location,
        class: RegisterClass,
        avoid: &[Location],
    ) -> Result<(Location, Option<RegisterLease>)> {
        if out.is_register() && register_of(out).map(|(c, _)| c) == Some(class) {
            return Ok((out, None));
        }
        let lease = self.acquire(class, avoid)?;
        Ok((lease.location(), Some(lease)))
    }

    fn settle(&mut self, out: Location, acc: Location, lease: Option<RegisterLease>, width: Width) -> Result<()> {
        if let Some(lease) = lease {
            self.transfer(width, out, acc)?;
            self.release(lease)?;
        }
        Ok(())
    }

    /// A float operand for an SSE instruction, converting integers through a lease
    fn float_operand(&mut self, value: &Value, avoid: &[Location]) -> Result<(Location, Option<RegisterLease>)> {
        if value.ty == ShaderType::Float {
            return Ok((value.location, None));
        }
        let scratch = self.acquire(RegisterClass::Simd, avoid)?;
        self.emit_rm(&op::CVTSI2SS, scratch.location(), value.location)?;
        Ok((scratch.location(), Some(scratch)))
    }

    // Registers

    fn acquire(&mut self, class: RegisterClass, avoid: &[Location]) -> Result<RegisterLease> {
        let lease = self.layout.lease(class, avoid)?;
        if let Some(spill) = lease.spill() {
            let store = match class {
                RegisterClass::General => &op::MOV_STORE,
                RegisterClass::Simd => &op::MOVUPS_STORE,
            };
            self.emit_mr(store, spill, lease.location())?;
        }
        Ok(lease)
    }

    /// Ends a lease, reloading the borrowed register's previous content
    fn release(&mut self, lease: RegisterLease) -> Result<()> {
        if let Some(spill) = lease.spill() {
            let load = match register_of(lease.location()) {
                Some((RegisterClass::General, _)) => &op::MOV_LOAD,
                _ => &op::MOVUPS_LOAD,
            };
            self.emit_rm(load, lease.location(), spill)?;
        }
        Ok(())
    }

    fn release_opt(&mut self, lease: Option<RegisterLease>) -> Result<()> {
        match lease {
            Some(lease) => self.release(lease),
            None => Ok(()),
        }
    }

    fn finish(&mut self, value: Value) -> Result<()> {
        self.release_opt(value.lease)
    }

    fn division_slots(&mut self) -> DivisionSlots {
        let layout = &self.layout;
        *self.division_slots.get_or_insert_with(|| DivisionSlots {
            eax: layout.allocate_global(4),
            edx: layout.allocate_global(4),
            divisor: layout.allocate_global(4),
        })
    }

    // Constants

    fn float_constant(&mut self, value: f32) -> Location {
        let bits = value.to_bits();
        if let Some(offset) = self.float_constants.get(&bits) {
            return Location::GlobalMemory(*offset);
        }

        let location = self.layout.allocate_global(4);
        let offset = location.global_offset().unwrap_or(0);
        self.float_constants.insert(bits, offset);
        self.constant_order.push((offset, [bits, 0, 0, 0], true));
        self.constant_names.insert(offset, format!("[{:?}f]", value));
        location
    }

    fn vector_constant(&mut self, bits: [u32; 4]) -> Location {
        if let Some(offset) = self.vector_constants.get(&bits) {
            return Location::GlobalMemory(*offset);
        }

        let location = self.layout.allocate_global(16);
        let offset = location.global_offset().unwrap_or(0);
        self.vector_constants.insert(bits, offset);
        self.constant_order.push((offset, bits, false));
        self.constant_names.insert(
            offset,
            format!("[{:08x}:{:08x}:{:08x}:{:08x}]", bits[0], bits[1], bits[2], bits[3]),
        );
        location
    }

    // Emission

    fn emit_rm(&mut self, opcode: &Opcode, reg: Location, rm: Location) -> Result<()> {
        self.emit_rm_imm(opcode, reg, rm, &[])
    }

    fn emit_rm_imm(&mut self, opcode: &Opcode, reg: Location, rm: Location, imm: &[u8]) -> Result<()> {
        let text = self.text(opcode, &[reg, rm], imm);
        let id = register_id(reg)?;
        let operand = operand(rm)?;
        self.code.encode(opcode, id, operand, imm, move || text);
        Ok(())
    }

    /// Store form: the register is the source, `rm` the destination
    fn emit_mr(&mut self, opcode: &Opcode, rm: Location, reg: Location) -> Result<()> {
        let text = self.text(opcode, &[rm, reg], &[]);
        let id = register_id(reg)?;
        let operand = operand(rm)?;
        self.code.encode(opcode, id, operand, &[], move || text);
        Ok(())
    }

    /// Single operand form; the reg field is the opcode's digit
    fn emit_m(&mut self, opcode: &Opcode, rm: Location, imm: &[u8]) -> Result<()> {
        let text = self.text(opcode, &[rm], imm);
        let operand = operand(rm)?;
        self.code.encode(opcode, 0, operand, imm, move || text);
        Ok(())
    }

    fn text(&self, opcode: &Opcode, operands: &[Location], imm: &[u8]) -> String {
        if !self.keep_listing {
            return String::new();
        }

        let mut parts: Vec<String> = operands
            .iter()
            .map(|location| self.operand_name(*location, opcode.rex_w))
            .collect();
        match imm.len() {
            0 => {}
            1 => parts.push(imm[0].to_string()),
            _ => {
                let mut bytes = [0u8; 4];
                bytes[..imm.len().min(4)].copy_from_slice(&imm[..imm.len().min(4)]);
                parts.push(i32::from_le_bytes(bytes).to_string());
            }
        }
        format!("{} {}", opcode.mnemonic, parts.join(","))
    }

    fn operand_name(&self, location: Location, wide: bool) -> String {
        match location {
            Location::None => "?".to_string(),
            Location::Register(r) if wide => reg::name64(r).to_string(),
            Location::Register(r) => reg::name32(r).to_string(),
            Location::SimdRegister(x) => format!("xmm{}", x),
            Location::RegisterLane { simd, shift } => format!("xmm{}.{}", simd, shift / 4),
            Location::IndirectRegister(r) => format!("[{}]", reg::name64(r)),
            Location::GlobalMemory(offset) | Location::LocalMemory(offset) => {
                if let Some(symbol) = self.symbols.resolve_address(location, self.function) {
                    return format!("[{}]", symbol.name);
                }
                match location {
                    Location::GlobalMemory(_) => self
                        .constant_names
                        .get(&offset)
                        .cloned()
                        .unwrap_or_else(|| format!("[global + {}]", offset)),
                    _ => format!("[rsi + {}]", offset),
                }
            }
        }
    }
}

fn register_id(location: Location) -> Result<u8> {
    match location {
        Location::Register(r) | Location::SimdRegister(r) => Ok(r),
        other => Err(Error::malformed(format!("{:?} is not a register", other))),
    }
}

fn operand(location: Location) -> Result<Operand> {
    match location {
        Location::Register(r) | Location::SimdRegister(r) => Ok(Operand::Register(r)),
        Location::GlobalMemory(offset) => Ok(Operand::Global(offset)),
        Location::LocalMemory(offset) => Ok(Operand::Local(offset)),
        Location::IndirectRegister(r) => Ok(Operand::Indirect(r)),
        other => Err(Error::malformed(format!("{:?} has no operand encoding", other))),
    }
}
