use crate::{
    Arithmetic, BinaryOperator, ConstantValue, DotOperator, Elem, ForLoop, Id, Instruction,
    IntKind, KernelArg, KernelProgram, LoadOperator, Operation, ProgramAxis, Select, Shape,
    StorageType, StoreOperator, Type, UnaryOperator, Value,
};

/// Incrementally builds a [kernel program](KernelProgram).
///
/// Instructions are appended to the innermost open block. A new block is opened for the body of
/// every [loop](Self::for_loop) and closed when the body closure returns.
///
/// Every method asserts that its operands are well typed, so a builder misuse is caught where it
/// happens rather than when the finished program is [verified](crate::verify).
#[derive(Debug)]
pub struct KernelBuilder {
    name: String,
    args: Vec<KernelArg>,
    blocks: Vec<Vec<Instruction>>,
    next_id: Id,
}

impl KernelBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: Vec::new(),
            blocks: vec![Vec::new()],
            next_id: 0,
        }
    }

    /// Declare a new kernel argument.
    pub fn arg(&mut self, ty: Type, divisibility: Option<u32>) -> Value {
        let value = self.allocate(ty);
        self.args.push(KernelArg::new(value, divisibility));
        value
    }

    pub fn program_id(&mut self, axis: ProgramAxis) -> Value {
        self.register(Operation::ProgramId(axis), Type::scalar(IntKind::I32))
    }

    /// A constant of type `ty`. Non scalar types splat the constant over the whole tile.
    pub fn constant(&mut self, value: impl Into<ConstantValue>, ty: Type) -> Value {
        assert!(!ty.is_pointer(), "Constants can't be pointers, got {ty}");
        let value = value.into().cast_to(ty.elem());
        self.register(Operation::Constant(value), ty)
    }

    pub fn make_range(&mut self, start: u32, end: u32) -> Value {
        assert!(start < end, "Empty range [{start}, {end})");
        let ty = Type::tile(IntKind::I32, Shape::Vector(end - start));
        self.register(Operation::MakeRange { start, end }, ty)
    }

    pub fn splat(&mut self, input: Value, shape: Shape) -> Value {
        assert!(
            input.ty.shape.is_scalar(),
            "Only scalars can be splat, got {}",
            input.ty
        );
        let ty = input.ty.with_shape(shape);
        self.register(Operation::Splat(UnaryOperator::new(input)), ty)
    }

    pub fn expand_dims(&mut self, input: Value, axis: u32) -> Value {
        let shape = input.ty.shape.expand(axis as usize).unwrap_or_else(|| {
            panic!("Can't expand {} along axis {axis}", input.ty);
        });
        let ty = input.ty.with_shape(shape);
        self.register(Operation::ExpandDims { input, axis }, ty)
    }

    pub fn broadcast(&mut self, input: Value, shape: Shape) -> Value {
        if input.ty.shape == shape {
            return input;
        }
        assert!(
            input.ty.shape.broadcasts_to(&shape),
            "Can't broadcast {} to {shape:?}",
            input.ty
        );
        let ty = input.ty.with_shape(shape);
        self.register(Operation::Broadcast(UnaryOperator::new(input)), ty)
    }

    pub fn add(&mut self, lhs: Value, rhs: Value) -> Value {
        self.arithmetic(Arithmetic::Add, lhs, rhs)
    }

    pub fn sub(&mut self, lhs: Value, rhs: Value) -> Value {
        self.arithmetic(Arithmetic::Sub, lhs, rhs)
    }

    pub fn mul(&mut self, lhs: Value, rhs: Value) -> Value {
        self.arithmetic(Arithmetic::Mul, lhs, rhs)
    }

    pub fn div(&mut self, lhs: Value, rhs: Value) -> Value {
        self.arithmetic(Arithmetic::Div, lhs, rhs)
    }

    pub fn rem(&mut self, lhs: Value, rhs: Value) -> Value {
        self.arithmetic(Arithmetic::Rem, lhs, rhs)
    }

    /// Signed `lhs < rhs`, lane by lane.
    pub fn lower(&mut self, lhs: Value, rhs: Value) -> Value {
        assert_same_type("lower", lhs, rhs);
        let ty = Type::tile(Elem::Bool, lhs.ty.shape);
        self.register(Operation::Lower(BinaryOperator::new(lhs, rhs)), ty)
    }

    pub fn and(&mut self, lhs: Value, rhs: Value) -> Value {
        assert_same_type("and", lhs, rhs);
        assert_eq!(lhs.elem(), Elem::Bool, "Logical and expects predicates");
        self.register(Operation::And(BinaryOperator::new(lhs, rhs)), lhs.ty)
    }

    pub fn select(&mut self, cond: Value, then: Value, or_else: Value) -> Value {
        assert_same_type("select", then, or_else);
        assert_eq!(cond.ty, Type::tile(Elem::Bool, then.ty.shape));
        let op = Select {
            cond,
            then,
            or_else,
        };
        self.register(Operation::Select(op), then.ty)
    }

    /// Convert every lane to `elem` with a single primitive conversion.
    pub fn cast(&mut self, input: Value, elem: Elem) -> Value {
        assert!(!input.ty.is_pointer(), "Can't cast pointers");
        if input.elem() == elem {
            return input;
        }
        let ty = input.ty.with_elem(elem);
        self.register(Operation::Cast(UnaryOperator::new(input)), ty)
    }

    /// Offset every pointer lane of `ptr` by the matching lane of `offset`, counted in elements.
    pub fn add_ptr(&mut self, ptr: Value, offset: Value) -> Value {
        assert!(ptr.ty.is_pointer(), "Expected a pointer, got {}", ptr.ty);
        assert!(
            offset.elem().is_int() && !offset.ty.is_pointer(),
            "Pointer offsets must be integers, got {}",
            offset.ty
        );
        assert_eq!(ptr.ty.shape, offset.ty.shape, "Pointer and offset shapes differ");
        self.register(Operation::AddPtr(BinaryOperator::new(ptr, offset)), ptr.ty)
    }

    pub fn load(&mut self, ptr: Value, mask: Option<Value>, other: Option<Value>) -> Value {
        assert!(ptr.ty.is_pointer(), "Expected a pointer, got {}", ptr.ty);
        let ty = Type::tile(ptr.elem(), ptr.ty.shape);
        if let Some(mask) = mask {
            assert_eq!(mask.ty, Type::tile(Elem::Bool, ptr.ty.shape), "Invalid load mask");
        }
        if let Some(other) = other {
            assert!(mask.is_some(), "A load fill value requires a mask");
            assert_eq!(other.ty, ty, "Invalid load fill value");
        }
        self.register(Operation::Load(LoadOperator { ptr, mask, other }), ty)
    }

    pub fn store(&mut self, ptr: Value, value: Value, mask: Option<Value>) {
        assert!(ptr.ty.is_pointer(), "Expected a pointer, got {}", ptr.ty);
        assert_eq!(
            value.ty,
            Type::tile(ptr.elem(), ptr.ty.shape),
            "Stored value doesn't match the pointer type"
        );
        if let Some(mask) = mask {
            assert_eq!(mask.ty, Type::tile(Elem::Bool, ptr.ty.shape), "Invalid store mask");
        }
        self.push(Instruction {
            out: None,
            operation: Operation::Store(StoreOperator { ptr, value, mask }),
        });
    }

    /// `acc + lhs @ rhs`
    pub fn dot(&mut self, lhs: Value, rhs: Value, acc: Value, allow_tf32: bool) -> Value {
        let (Shape::Matrix(m, k), Shape::Matrix(k_rhs, n)) = (lhs.ty.shape, rhs.ty.shape) else {
            panic!("Dot operands must be matrices, got {} and {}", lhs.ty, rhs.ty);
        };
        assert_eq!(k, k_rhs, "Dot contracting extents differ");
        assert_eq!(lhs.elem(), rhs.elem(), "Dot operands must share an element type");
        assert_eq!(acc.ty.shape, Shape::Matrix(m, n), "Invalid dot accumulator shape");
        let op = DotOperator {
            lhs,
            rhs,
            acc,
            allow_tf32,
        };
        self.register(Operation::Dot(op), acc.ty)
    }

    /// Emit a loop over `[start, end)` by `step`.
    ///
    /// The body closure receives the induction variable and the loop-carried values and returns
    /// the values carried into the next iteration. The loop results are returned once the body
    /// is closed.
    pub fn for_loop<F>(
        &mut self,
        start: Value,
        end: Value,
        step: Value,
        init: &[Value],
        body: F,
    ) -> Vec<Value>
    where
        F: FnOnce(&mut Self, Value, &[Value]) -> Vec<Value>,
    {
        assert!(
            start.ty == end.ty && end.ty == step.ty,
            "Loop bounds must share a type"
        );
        assert!(
            start.elem().is_int() && start.ty.shape.is_scalar() && !start.ty.is_pointer(),
            "Loop bounds must be scalar integers"
        );

        let induction = self.allocate(start.ty);
        let carried = init
            .iter()
            .map(|value| self.allocate(value.ty))
            .collect::<Vec<_>>();

        self.blocks.push(Vec::new());
        let yielded = body(self, induction, &carried);
        let body = self.blocks.pop().unwrap_or_default();

        assert_eq!(yielded.len(), carried.len(), "Loop yields the wrong number of values");
        for (yielded, carried) in yielded.iter().zip(carried.iter()) {
            assert_eq!(yielded.ty, carried.ty, "Loop yields a value of the wrong type");
        }

        let results = init
            .iter()
            .map(|value| self.allocate(value.ty))
            .collect::<Vec<_>>();

        self.push(Instruction {
            out: None,
            operation: Operation::For(ForLoop {
                start,
                end,
                step,
                induction,
                init: init.to_vec(),
                carried,
                body,
                yielded,
                results: results.clone(),
            }),
        });

        results
    }

    pub fn build(mut self) -> KernelProgram {
        assert_eq!(self.blocks.len(), 1, "Unclosed loop body");
        KernelProgram {
            name: self.name,
            args: self.args,
            body: self.blocks.pop().unwrap_or_default(),
        }
    }

    fn arithmetic(
        &mut self,
        kind: fn(BinaryOperator) -> Arithmetic,
        lhs: Value,
        rhs: Value,
    ) -> Value {
        assert_same_type("arithmetic", lhs, rhs);
        assert!(
            matches!(lhs.ty.storage, StorageType::Scalar(Elem::Int(_) | Elem::Float(_))),
            "Arithmetic on {} isn't supported",
            lhs.ty
        );
        let op = kind(BinaryOperator::new(lhs, rhs));
        self.register(Operation::Arithmetic(op), lhs.ty)
    }

    fn register(&mut self, operation: Operation, ty: Type) -> Value {
        let out = self.allocate(ty);
        self.push(Instruction {
            out: Some(out),
            operation,
        });
        out
    }

    fn push(&mut self, instruction: Instruction) {
        // The root block is only popped by `build`, which consumes the builder.
        if let Some(block) = self.blocks.last_mut() {
            block.push(instruction);
        }
    }

    fn allocate(&mut self, ty: Type) -> Value {
        let value = Value::new(self.next_id, ty);
        self.next_id += 1;
        value
    }
}

fn assert_same_type(op: &str, lhs: Value, rhs: Value) {
    assert_eq!(
        lhs.ty, rhs.ty,
        "Operands of {op} must share a type, got {} and {}",
        lhs.ty, rhs.ty
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FloatKind;

    #[test]
    fn values_are_numbered_in_definition_order() {
        let mut builder = KernelBuilder::new("kernel");
        let ptr = builder.arg(Type::pointer(FloatKind::F32), Some(16));
        let pid = builder.program_id(ProgramAxis::X);
        let range = builder.make_range(0, 16);

        assert_eq!(ptr.id, 0);
        assert_eq!(pid.id, 1);
        assert_eq!(range.id, 2);
        assert_eq!(range.ty, Type::tile(IntKind::I32, Shape::Vector(16)));
    }

    #[test]
    fn loop_results_mirror_init_values() {
        let mut builder = KernelBuilder::new("kernel");
        let i32_ty = Type::scalar(IntKind::I32);
        let zero = builder.constant(0, i32_ty);
        let end = builder.constant(8, i32_ty);
        let step = builder.constant(2, i32_ty);
        let acc = builder.constant(0.0, Type::tile(FloatKind::F32, Shape::Vector(4)));

        let results = builder.for_loop(zero, end, step, &[acc], |builder, _, carried| {
            let one = builder.constant(1.0, carried[0].ty);
            vec![builder.add(carried[0], one)]
        });

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].ty, acc.ty);

        let program = builder.build();
        let Some(Instruction {
            operation: Operation::For(for_loop),
            ..
        }) = program.body.last()
        else {
            panic!("Expected a loop");
        };
        assert_eq!(for_loop.body.len(), 2);
    }

    #[test]
    #[should_panic(expected = "must share a type")]
    fn mixed_type_arithmetic_is_rejected() {
        let mut builder = KernelBuilder::new("kernel");
        let a = builder.constant(1, Type::scalar(IntKind::I32));
        let b = builder.constant(1, Type::scalar(IntKind::I64));
        builder.add(a, b);
    }
}
