use hashbrown::{HashMap, HashSet};
use thiserror::Error;

use crate::{
    Elem, ForLoop, Id, Instruction, IntKind, KernelProgram, Operation, Shape, Type, Value,
};

/// Structural problems found in a [kernel program](KernelProgram).
#[derive(Error, Clone, PartialEq, Eq)]
pub enum VerificationError {
    /// A value is read where it isn't visible.
    #[error("Value %{value} is used before being defined, in `{instruction}`")]
    UndefinedValue { value: Id, instruction: String },

    /// Two definitions share the same id.
    #[error("Value %{value} is defined more than once")]
    Redefinition { value: Id },

    /// An instruction doesn't type check.
    #[error("Invalid instruction `{instruction}`\nCaused by:\n  {reason}")]
    InvalidInstruction { instruction: String, reason: String },
}

impl core::fmt::Debug for VerificationError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_fmt(format_args!("{self}"))
    }
}

/// Check that every value is defined once before being used, that values defined in a loop body
/// don't escape it and that every instruction is well typed.
pub fn verify(program: &KernelProgram) -> Result<(), VerificationError> {
    let mut verifier = Verifier::default();

    for arg in program.args.iter() {
        if !arg.value.ty.is_pointer() {
            return Err(VerificationError::InvalidInstruction {
                instruction: format!("argument {}", arg.value),
                reason: format!("kernel arguments must be pointers, got {}", arg.value.ty),
            });
        }
        verifier.define(arg.value)?;
    }

    verifier.verify_block(&program.body)
}

#[derive(Default)]
struct Verifier {
    visible: HashMap<Id, Type>,
    defined: HashSet<Id>,
}

impl Verifier {
    fn define(&mut self, value: Value) -> Result<(), VerificationError> {
        if !self.defined.insert(value.id) {
            return Err(VerificationError::Redefinition { value: value.id });
        }
        self.visible.insert(value.id, value.ty);
        Ok(())
    }

    fn verify_block(&mut self, block: &[Instruction]) -> Result<(), VerificationError> {
        for instruction in block {
            self.verify_instruction(instruction)?;
        }
        Ok(())
    }

    fn verify_instruction(&mut self, instruction: &Instruction) -> Result<(), VerificationError> {
        let invalid = |reason: String| VerificationError::InvalidInstruction {
            instruction: instruction.operation.to_string(),
            reason,
        };

        for arg in instruction.operation.args() {
            self.check_use(arg, &instruction.operation)?;
        }

        if let Operation::For(for_loop) = &instruction.operation {
            if instruction.out.is_some() {
                return Err(invalid("loops define their results separately".into()));
            }
            return self.verify_loop(for_loop);
        }

        let expected = expected_type(&instruction.operation, instruction.out).map_err(invalid)?;

        match (instruction.out, expected) {
            (Some(out), Some(expected)) if out.ty == expected => self.define(out),
            (Some(out), Some(expected)) => Err(invalid(format!(
                "output type {} doesn't match the expected type {expected}",
                out.ty
            ))),
            (None, None) => Ok(()),
            (Some(_), None) => Err(invalid("the operation doesn't produce a value".into())),
            (None, Some(_)) => Err(invalid("the operation result isn't bound".into())),
        }
    }

    fn verify_loop(&mut self, for_loop: &ForLoop) -> Result<(), VerificationError> {
        let invalid = |reason: String| VerificationError::InvalidInstruction {
            instruction: Operation::For(for_loop.clone()).to_string(),
            reason,
        };

        let bound = for_loop.start.ty;
        if !(bound.shape.is_scalar() && !bound.is_pointer() && bound.elem().is_int()) {
            return Err(invalid(format!("loop bounds must be scalar integers, got {bound}")));
        }
        if for_loop.end.ty != bound || for_loop.step.ty != bound || for_loop.induction.ty != bound
        {
            return Err(invalid("loop bounds and induction variable must share a type".into()));
        }

        let arity = for_loop.init.len();
        if for_loop.carried.len() != arity
            || for_loop.yielded.len() != arity
            || for_loop.results.len() != arity
        {
            return Err(invalid(format!(
                "loop carries {arity} values but has {} region arguments, {} yields and {} results",
                for_loop.carried.len(),
                for_loop.yielded.len(),
                for_loop.results.len()
            )));
        }
        for i in 0..arity {
            let ty = for_loop.init[i].ty;
            if for_loop.carried[i].ty != ty
                || for_loop.yielded[i].ty != ty
                || for_loop.results[i].ty != ty
            {
                return Err(invalid(format!("loop carried value {i} changes type")));
            }
        }

        let outer = self.visible.clone();
        self.define(for_loop.induction)?;
        for carried in for_loop.carried.iter() {
            self.define(*carried)?;
        }
        self.verify_block(&for_loop.body)?;
        for yielded in for_loop.yielded.iter() {
            if !self.visible.contains_key(&yielded.id) {
                return Err(VerificationError::UndefinedValue {
                    value: yielded.id,
                    instruction: "yield".into(),
                });
            }
        }
        self.visible = outer;

        for result in for_loop.results.iter() {
            self.define(*result)?;
        }

        Ok(())
    }

    fn check_use(&self, value: Value, operation: &Operation) -> Result<(), VerificationError> {
        match self.visible.get(&value.id) {
            Some(ty) if *ty == value.ty => Ok(()),
            Some(ty) => Err(VerificationError::InvalidInstruction {
                instruction: operation.to_string(),
                reason: format!(
                    "{value} is used as {} but was defined as {ty}",
                    value.ty
                ),
            }),
            None => Err(VerificationError::UndefinedValue {
                value: value.id,
                instruction: operation.to_string(),
            }),
        }
    }
}

/// The type an operation produces, or `None` for operations without a result.
fn expected_type(operation: &Operation, out: Option<Value>) -> Result<Option<Type>, String> {
    let out_ty = || out.map(|out| out.ty).ok_or_else(|| String::from("missing output"));
    let predicate = |shape: Shape| Type::tile(Elem::Bool, shape);

    let ty = match operation {
        Operation::ProgramId(_) => Type::scalar(IntKind::I32),
        Operation::Constant(_) => {
            let ty = out_ty()?;
            if ty.is_pointer() {
                return Err("constants can't be pointers".into());
            }
            ty
        }
        Operation::MakeRange { start, end } => {
            if start >= end {
                return Err(format!("empty range [{start}, {end})"));
            }
            Type::tile(IntKind::I32, Shape::Vector(end - start))
        }
        Operation::Splat(op) => {
            if !op.input.ty.shape.is_scalar() {
                return Err(format!("can't splat {}", op.input.ty));
            }
            op.input.ty.with_shape(out_ty()?.shape)
        }
        Operation::ExpandDims { input, axis } => {
            let shape = input
                .ty
                .shape
                .expand(*axis as usize)
                .ok_or_else(|| format!("can't expand {} along axis {axis}", input.ty))?;
            input.ty.with_shape(shape)
        }
        Operation::Broadcast(op) => {
            let shape = out_ty()?.shape;
            if !op.input.ty.shape.broadcasts_to(&shape) {
                return Err(format!("can't broadcast {} to {shape:?}", op.input.ty));
            }
            op.input.ty.with_shape(shape)
        }
        Operation::Arithmetic(op) => {
            let op = op.operator();
            same_type(op.lhs, op.rhs)?;
            if op.lhs.ty.is_pointer() || op.lhs.elem() == Elem::Bool {
                return Err(format!("arithmetic on {} isn't supported", op.lhs.ty));
            }
            op.lhs.ty
        }
        Operation::Lower(op) => {
            same_type(op.lhs, op.rhs)?;
            predicate(op.lhs.ty.shape)
        }
        Operation::And(op) => {
            same_type(op.lhs, op.rhs)?;
            if op.lhs.ty != predicate(op.lhs.ty.shape) {
                return Err("logical and expects predicates".into());
            }
            op.lhs.ty
        }
        Operation::Select(op) => {
            same_type(op.then, op.or_else)?;
            if op.cond.ty != predicate(op.then.ty.shape) {
                return Err(format!("invalid select condition {}", op.cond.ty));
            }
            op.then.ty
        }
        Operation::Cast(op) => {
            let ty = out_ty()?;
            if op.input.ty.is_pointer() || ty.is_pointer() {
                return Err("can't cast pointers".into());
            }
            op.input.ty.with_elem(ty.elem())
        }
        Operation::AddPtr(op) => {
            if !op.lhs.ty.is_pointer() {
                return Err(format!("expected a pointer, got {}", op.lhs.ty));
            }
            if op.rhs.ty.is_pointer() || !op.rhs.elem().is_int() {
                return Err(format!("pointer offsets must be integers, got {}", op.rhs.ty));
            }
            if op.lhs.ty.shape != op.rhs.ty.shape {
                return Err("pointer and offset shapes differ".into());
            }
            op.lhs.ty
        }
        Operation::Load(op) => {
            if !op.ptr.ty.is_pointer() {
                return Err(format!("expected a pointer, got {}", op.ptr.ty));
            }
            let ty = Type::tile(op.ptr.elem(), op.ptr.ty.shape);
            if let Some(mask) = op.mask {
                if mask.ty != predicate(ty.shape) {
                    return Err(format!("invalid load mask {}", mask.ty));
                }
            }
            if let Some(other) = op.other {
                if other.ty != ty || op.mask.is_none() {
                    return Err(format!("invalid load fill value {}", other.ty));
                }
            }
            ty
        }
        Operation::Store(op) => {
            if !op.ptr.ty.is_pointer() {
                return Err(format!("expected a pointer, got {}", op.ptr.ty));
            }
            if op.value.ty != Type::tile(op.ptr.elem(), op.ptr.ty.shape) {
                return Err(format!(
                    "can't store {} through {}",
                    op.value.ty, op.ptr.ty
                ));
            }
            if let Some(mask) = op.mask {
                if mask.ty != predicate(op.ptr.ty.shape) {
                    return Err(format!("invalid store mask {}", mask.ty));
                }
            }
            return Ok(None);
        }
        Operation::Dot(op) => {
            let (Shape::Matrix(m, k), Shape::Matrix(k_rhs, n)) = (op.lhs.ty.shape, op.rhs.ty.shape)
            else {
                return Err("dot operands must be matrices".into());
            };
            if k != k_rhs || op.lhs.elem() != op.rhs.elem() {
                return Err(format!("can't multiply {} by {}", op.lhs.ty, op.rhs.ty));
            }
            if op.acc.ty.shape != Shape::Matrix(m, n) || op.acc.ty.is_pointer() {
                return Err(format!("invalid accumulator {}", op.acc.ty));
            }
            op.acc.ty
        }
        Operation::For(_) => return Ok(None),
    };

    Ok(Some(ty))
}

fn same_type(lhs: Value, rhs: Value) -> Result<(), String> {
    if lhs.ty != rhs.ty {
        return Err(format!(
            "operands must share a type, got {} and {}",
            lhs.ty, rhs.ty
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        BinaryOperator, FloatKind, KernelBuilder, Operation, ProgramAxis, UnaryOperator,
    };

    fn sample() -> KernelProgram {
        let mut builder = KernelBuilder::new("sample");
        let ptr = builder.arg(Type::pointer(FloatKind::F32), Some(16));
        let i32_ty = Type::scalar(IntKind::I32);
        let zero = builder.constant(0, i32_ty);
        let end = builder.program_id(ProgramAxis::X);
        let one = builder.constant(1, i32_ty);
        let acc = builder.constant(0.0, Type::scalar(FloatKind::F32));
        let results = builder.for_loop(zero, end, one, &[acc], |builder, _, carried| {
            let value = builder.load(ptr, None, None);
            vec![builder.add(carried[0], value)]
        });
        builder.store(ptr, results[0], None);
        builder.build()
    }

    #[test]
    fn builder_output_verifies() {
        assert_eq!(verify(&sample()), Ok(()));
    }

    #[test]
    fn loop_locals_do_not_escape() {
        let mut program = sample();
        let Operation::For(for_loop) = &program.body[4].operation else {
            panic!("Expected a loop");
        };
        let inner = for_loop.body[1].out.unwrap();
        let Operation::Store(store) = &mut program.body[5].operation else {
            panic!("Expected a store");
        };
        store.value = inner;

        assert!(matches!(
            verify(&program),
            Err(VerificationError::UndefinedValue { value, .. }) if value == inner.id
        ));
    }

    #[test]
    fn mismatched_output_type_is_reported() {
        let mut program = sample();
        let zero = program.body[0].out.unwrap();
        program.body.push(Instruction {
            out: Some(Value::new(100, Type::scalar(IntKind::I64))),
            operation: Operation::Arithmetic(crate::Arithmetic::Add(BinaryOperator::new(
                zero, zero,
            ))),
        });

        let err = verify(&program).unwrap_err();
        assert!(err.to_string().contains("doesn't match the expected type i32"));
    }

    #[test]
    fn redefinition_is_reported() {
        let mut program = sample();
        let zero = program.body[0].out.unwrap();
        program.body.push(Instruction {
            out: Some(zero),
            operation: Operation::Cast(UnaryOperator::new(zero)),
        });

        assert_eq!(
            verify(&program),
            Err(VerificationError::Redefinition { value: zero.id })
        );
    }
}
