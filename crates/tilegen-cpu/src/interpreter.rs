use hashbrown::HashMap;
use tilegen_ir::{
    Arithmetic, DotOperator, Elem, ForLoop, Id, Instruction, KernelProgram, LoadOperator,
    Operation, ProgramAxis, Shape, StoreOperator, Type, Value,
};

use crate::{
    ExecutionError, HostBuffer,
    value::{Scalar, Tile, round_float, wrap_int},
};

/// Counters gathered while executing a launch grid.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionStats {
    /// Program instances executed.
    pub programs: u64,
    /// Lanes read from a buffer.
    pub loaded_lanes: u64,
    /// Lanes written to a buffer.
    pub stored_lanes: u64,
    /// Load and store lanes skipped because of their mask.
    pub masked_lanes: u64,
}

/// Execute `program` once for every program id of `grid`, serially.
///
/// `buffers[i]` is bound to the `i`-th argument of the program. Memory is only accessed by
/// unmasked lanes, and any of them addressing outside of its buffer aborts the execution.
pub fn execute(
    program: &KernelProgram,
    grid: (u32, u32, u32),
    buffers: &mut [HostBuffer],
) -> Result<ExecutionStats, ExecutionError> {
    for (index, arg) in program.args.iter().enumerate() {
        let buffer = buffers.get(index).ok_or(ExecutionError::MissingBuffer {
            index,
            available: buffers.len(),
        })?;
        let expected = arg.value.elem().storage_elem();
        if buffer.elem() != expected {
            return Err(ExecutionError::BufferType {
                index,
                expected,
                actual: buffer.elem(),
            });
        }
    }

    let mut stats = ExecutionStats::default();

    for z in 0..grid.2 {
        for y in 0..grid.1 {
            for x in 0..grid.0 {
                let mut instance = ProgramInstance {
                    pid: [x, y, z],
                    values: HashMap::new(),
                    buffers: &mut *buffers,
                    stats: &mut stats,
                };
                for (index, arg) in program.args.iter().enumerate() {
                    let ptr = Scalar::Ptr {
                        buffer: index,
                        offset: 0,
                    };
                    instance.values.insert(arg.value.id, Tile::splat(arg.value.ty, ptr));
                }
                instance.run_block(&program.body)?;
                stats.programs += 1;
            }
        }
    }

    log::trace!("Executed {} on grid {grid:?}: {stats:?}", program.name);

    Ok(stats)
}

struct ProgramInstance<'a> {
    pid: [u32; 3],
    values: HashMap<Id, Tile>,
    buffers: &'a mut [HostBuffer],
    stats: &'a mut ExecutionStats,
}

fn invalid(instruction: &Instruction, reason: impl Into<String>) -> ExecutionError {
    ExecutionError::InvalidOperation {
        instruction: instruction.operation.to_string(),
        reason: reason.into(),
    }
}

impl ProgramInstance<'_> {
    fn run_block(&mut self, block: &[Instruction]) -> Result<(), ExecutionError> {
        for instruction in block {
            self.run(instruction)?;
        }
        Ok(())
    }

    fn run(&mut self, instruction: &Instruction) -> Result<(), ExecutionError> {
        match &instruction.operation {
            Operation::For(for_loop) => return self.run_loop(instruction, for_loop),
            Operation::Store(op) => return self.store(instruction, op),
            _ => {}
        }

        let out = instruction
            .out
            .ok_or_else(|| invalid(instruction, "the result isn't bound"))?;
        let lanes = self.evaluate(instruction, out.ty)?;
        if lanes.len() != out.ty.num_elements() {
            return Err(invalid(
                instruction,
                format!("produced {} lanes for {}", lanes.len(), out.ty),
            ));
        }
        self.values.insert(out.id, Tile { ty: out.ty, lanes });

        Ok(())
    }

    fn get(&self, instruction: &Instruction, value: Value) -> Result<&Tile, ExecutionError> {
        self.values
            .get(&value.id)
            .ok_or_else(|| invalid(instruction, format!("{value} is undefined")))
    }

    fn evaluate(
        &mut self,
        instruction: &Instruction,
        ty: Type,
    ) -> Result<Vec<Scalar>, ExecutionError> {
        let elem = ty.elem();

        let lanes = match &instruction.operation {
            Operation::ProgramId(axis) => {
                let pid = match axis {
                    ProgramAxis::X => self.pid[0],
                    ProgramAxis::Y => self.pid[1],
                    ProgramAxis::Z => self.pid[2],
                };
                vec![Scalar::Int(pid as i64)]
            }
            Operation::Constant(value) => {
                vec![Scalar::from_constant(*value, elem); ty.num_elements()]
            }
            Operation::MakeRange { start, end } => {
                (*start..*end).map(|i| Scalar::Int(i as i64)).collect()
            }
            Operation::Splat(op) => {
                let input = self.get(instruction, op.input)?.scalar();
                vec![input; ty.num_elements()]
            }
            Operation::ExpandDims { input, .. } => self.get(instruction, *input)?.lanes.clone(),
            Operation::Broadcast(op) => {
                self.get(instruction, op.input)?.broadcast_lanes(ty.shape)
            }
            Operation::Arithmetic(op) => {
                let operator = op.operator();
                let lhs = self.get(instruction, operator.lhs)?;
                let rhs = self.get(instruction, operator.rhs)?;
                lhs.lanes
                    .iter()
                    .zip(rhs.lanes.iter())
                    .map(|(a, b)| arithmetic(instruction, op, elem, *a, *b))
                    .collect::<Result<Vec<_>, _>>()?
            }
            Operation::Lower(op) => {
                let lhs = self.get(instruction, op.lhs)?;
                let rhs = self.get(instruction, op.rhs)?;
                let is_float = lhs.ty.elem().is_float();
                lhs.lanes
                    .iter()
                    .zip(rhs.lanes.iter())
                    .map(|(a, b)| {
                        if is_float {
                            Scalar::Bool(a.as_f64() < b.as_f64())
                        } else {
                            Scalar::Bool(a.as_i64() < b.as_i64())
                        }
                    })
                    .collect()
            }
            Operation::And(op) => {
                let lhs = self.get(instruction, op.lhs)?;
                let rhs = self.get(instruction, op.rhs)?;
                lhs.lanes
                    .iter()
                    .zip(rhs.lanes.iter())
                    .map(|(a, b)| Scalar::Bool(a.as_bool() && b.as_bool()))
                    .collect()
            }
            Operation::Select(op) => {
                let cond = self.get(instruction, op.cond)?;
                let then = self.get(instruction, op.then)?;
                let or_else = self.get(instruction, op.or_else)?;
                cond.lanes
                    .iter()
                    .zip(then.lanes.iter().zip(or_else.lanes.iter()))
                    .map(|(cond, (a, b))| if cond.as_bool() { *a } else { *b })
                    .collect()
            }
            Operation::Cast(op) => {
                let input = self.get(instruction, op.input)?;
                input.lanes.iter().map(|lane| lane.cast(elem)).collect()
            }
            Operation::AddPtr(op) => {
                let ptrs = self.get(instruction, op.lhs)?;
                let offsets = self.get(instruction, op.rhs)?;
                ptrs.lanes
                    .iter()
                    .zip(offsets.lanes.iter())
                    .map(|(ptr, offset)| match ptr {
                        Scalar::Ptr {
                            buffer,
                            offset: base,
                        } => Ok(Scalar::Ptr {
                            buffer: *buffer,
                            offset: base.wrapping_add(offset.as_i64()),
                        }),
                        _ => Err(invalid(instruction, "expected a pointer")),
                    })
                    .collect::<Result<Vec<_>, _>>()?
            }
            Operation::Load(op) => self.load(instruction, op, elem)?,
            Operation::Dot(op) => self.dot(instruction, op, ty)?,
            Operation::Store(_) | Operation::For(_) => {
                return Err(invalid(instruction, "the operation doesn't produce a value"));
            }
        };

        Ok(lanes)
    }

    fn load(
        &mut self,
        instruction: &Instruction,
        op: &LoadOperator,
        elem: Elem,
    ) -> Result<Vec<Scalar>, ExecutionError> {
        let ptrs = self.get(instruction, op.ptr)?;
        let mask = op.mask.map(|mask| self.get(instruction, mask)).transpose()?;
        let other = op.other.map(|other| self.get(instruction, other)).transpose()?;
        let zero = Scalar::Int(0).cast(elem);

        let mut lanes = Vec::with_capacity(ptrs.lanes.len());
        let (mut loaded, mut masked) = (0, 0);

        for (i, ptr) in ptrs.lanes.iter().enumerate() {
            let enabled = mask.map(|mask| mask.lanes[i].as_bool()).unwrap_or(true);
            if !enabled {
                masked += 1;
                lanes.push(other.map(|other| other.lanes[i]).unwrap_or(zero));
                continue;
            }
            let (buffer, index) = self.address(instruction, *ptr)?;
            lanes.push(self.buffers[buffer].read(index).cast(elem));
            loaded += 1;
        }

        self.stats.loaded_lanes += loaded;
        self.stats.masked_lanes += masked;

        Ok(lanes)
    }

    fn store(
        &mut self,
        instruction: &Instruction,
        op: &StoreOperator,
    ) -> Result<(), ExecutionError> {
        let ptrs = self.get(instruction, op.ptr)?;
        let values = self.get(instruction, op.value)?;
        let mask = op.mask.map(|mask| self.get(instruction, mask)).transpose()?;

        let mut writes = Vec::with_capacity(ptrs.lanes.len());
        let mut masked = 0;
        for (i, ptr) in ptrs.lanes.iter().enumerate() {
            let enabled = mask.map(|mask| mask.lanes[i].as_bool()).unwrap_or(true);
            if !enabled {
                masked += 1;
                continue;
            }
            let (buffer, index) = self.address(instruction, *ptr)?;
            writes.push((buffer, index, values.lanes[i]));
        }

        self.stats.stored_lanes += writes.len() as u64;
        self.stats.masked_lanes += masked;
        for (buffer, index, value) in writes {
            self.buffers[buffer].write(index, value);
        }

        Ok(())
    }

    /// Bounds checked buffer index of a pointer lane.
    fn address(
        &self,
        instruction: &Instruction,
        ptr: Scalar,
    ) -> Result<(usize, usize), ExecutionError> {
        let Scalar::Ptr { buffer, offset } = ptr else {
            return Err(invalid(instruction, "expected a pointer"));
        };
        let len = self.buffers[buffer].len();
        if offset < 0 || offset as u64 >= len as u64 {
            return Err(ExecutionError::OutOfBounds {
                buffer,
                offset,
                len,
                instruction: instruction.operation.to_string(),
            });
        }
        Ok((buffer, offset as usize))
    }

    /// `acc + lhs @ rhs`, rounding to the accumulator type after every fused multiply-add.
    fn dot(
        &self,
        instruction: &Instruction,
        op: &DotOperator,
        ty: Type,
    ) -> Result<Vec<Scalar>, ExecutionError> {
        let lhs = self.get(instruction, op.lhs)?;
        let rhs = self.get(instruction, op.rhs)?;
        let acc = self.get(instruction, op.acc)?;

        let (Shape::Matrix(m, k), Shape::Matrix(_, n)) = (lhs.ty.shape, rhs.ty.shape) else {
            return Err(invalid(instruction, "dot operands must be matrices"));
        };
        let (m, k, n) = (m as usize, k as usize, n as usize);

        let mut lanes = acc.lanes.clone();
        for i in 0..m {
            for j in 0..n {
                let mut sum = lanes[i * n + j];
                for l in 0..k {
                    let a = lhs.lanes[i * k + l];
                    let b = rhs.lanes[l * n + j];
                    sum = match ty.elem() {
                        Elem::Float(kind) => {
                            let fma = a.as_f64().mul_add(b.as_f64(), sum.as_f64());
                            Scalar::Float(round_float(fma, kind))
                        }
                        Elem::Int(kind) => {
                            let product = a.as_i64().wrapping_mul(b.as_i64());
                            Scalar::Int(wrap_int(product.wrapping_add(sum.as_i64()), kind))
                        }
                        Elem::Bool => {
                            return Err(invalid(instruction, "can't accumulate predicates"));
                        }
                    };
                }
                lanes[i * n + j] = sum;
            }
        }

        Ok(lanes)
    }

    fn run_loop(
        &mut self,
        instruction: &Instruction,
        for_loop: &ForLoop,
    ) -> Result<(), ExecutionError> {
        let start = self.get(instruction, for_loop.start)?.scalar().as_i64();
        let end = self.get(instruction, for_loop.end)?.scalar().as_i64();
        let step = self.get(instruction, for_loop.step)?.scalar().as_i64();
        if step <= 0 {
            let reason = format!("loop step must be positive, got {step}");
            return Err(invalid(instruction, reason));
        }

        let mut carried = for_loop
            .init
            .iter()
            .map(|value| self.get(instruction, *value).cloned())
            .collect::<Result<Vec<_>, _>>()?;

        let mut i = start;
        while i < end {
            let induction = Tile::splat(for_loop.induction.ty, Scalar::Int(i));
            self.values.insert(for_loop.induction.id, induction);
            for (value, tile) in for_loop.carried.iter().zip(carried.drain(..)) {
                self.values.insert(value.id, tile);
            }

            self.run_block(&for_loop.body)?;

            carried = for_loop
                .yielded
                .iter()
                .map(|value| self.get(instruction, *value).cloned())
                .collect::<Result<Vec<_>, _>>()?;
            i += step;
        }

        for (value, tile) in for_loop.results.iter().zip(carried) {
            self.values.insert(value.id, tile);
        }

        Ok(())
    }
}

fn arithmetic(
    instruction: &Instruction,
    op: &Arithmetic,
    elem: Elem,
    a: Scalar,
    b: Scalar,
) -> Result<Scalar, ExecutionError> {
    match elem {
        Elem::Float(kind) => {
            let (a, b) = (a.as_f64(), b.as_f64());
            let value = match op {
                Arithmetic::Add(_) => a + b,
                Arithmetic::Sub(_) => a - b,
                Arithmetic::Mul(_) => a * b,
                Arithmetic::Div(_) => a / b,
                Arithmetic::Rem(_) => a % b,
            };
            Ok(Scalar::Float(round_float(value, kind)))
        }
        Elem::Int(kind) => {
            let (a, b) = (a.as_i64(), b.as_i64());
            let value = match op {
                Arithmetic::Add(_) => a.wrapping_add(b),
                Arithmetic::Sub(_) => a.wrapping_sub(b),
                Arithmetic::Mul(_) => a.wrapping_mul(b),
                Arithmetic::Div(_) | Arithmetic::Rem(_) if b == 0 => {
                    return Err(ExecutionError::DivisionByZero {
                        instruction: instruction.operation.to_string(),
                    });
                }
                Arithmetic::Div(_) => a.wrapping_div(b),
                Arithmetic::Rem(_) => a.wrapping_rem(b),
            };
            Ok(Scalar::Int(wrap_int(value, kind)))
        }
        Elem::Bool => Err(invalid(instruction, "arithmetic on predicates isn't supported")),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use tilegen_ir::{FloatKind, IntKind, KernelBuilder};

    use super::*;

    const F32: Elem = Elem::Float(FloatKind::F32);
    const I32: Elem = Elem::Int(IntKind::I32);

    /// `out[pid * 4 + i] = in[pid * 4 + i] * 2` for the lanes below `len`.
    fn scale_program(masked: bool, len: i64) -> KernelProgram {
        let mut builder = KernelBuilder::new("scale");
        let input = builder.arg(Type::pointer(F32), Some(16));
        let output = builder.arg(Type::pointer(F32), Some(16));

        let shape = Shape::Vector(4);
        let pid = builder.program_id(ProgramAxis::X);
        let four = builder.constant(4, Type::scalar(I32));
        let start = builder.mul(pid, four);
        let start = builder.splat(start, shape);
        let lanes = builder.make_range(0, 4);
        let offsets = builder.add(start, lanes);

        let mask = masked.then(|| {
            let len = builder.constant(len, Type::tile(I32, shape));
            builder.lower(offsets, len)
        });

        let input = builder.splat(input, shape);
        let input = builder.add_ptr(input, offsets);
        let output = builder.splat(output, shape);
        let output = builder.add_ptr(output, offsets);

        let values = builder.load(input, mask, None);
        let two = builder.constant(2.0, Type::tile(F32, shape));
        let values = builder.mul(values, two);
        builder.store(output, values, mask);

        builder.build()
    }

    #[test_log::test]
    fn masked_lanes_skip_memory() {
        let program = scale_program(true, 6);
        let mut buffers = vec![
            HostBuffer::from_f64(F32, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]),
            HostBuffer::zeros(F32, 6),
        ];

        let stats = execute(&program, (2, 1, 1), &mut buffers).unwrap();

        assert_eq!(buffers[1].to_f64(), vec![2.0, 4.0, 6.0, 8.0, 10.0, 12.0]);
        assert_eq!(
            stats,
            ExecutionStats {
                programs: 2,
                loaded_lanes: 6,
                stored_lanes: 6,
                masked_lanes: 4,
            }
        );
    }

    #[test_log::test]
    fn unmasked_overhang_is_out_of_bounds() {
        let program = scale_program(false, 0);
        let mut buffers = vec![HostBuffer::zeros(F32, 6), HostBuffer::zeros(F32, 6)];

        let err = execute(&program, (2, 1, 1), &mut buffers).unwrap_err();

        assert!(matches!(
            err,
            ExecutionError::OutOfBounds {
                buffer: 0,
                offset: 6,
                len: 6,
                ..
            }
        ));
    }

    #[test]
    fn buffers_must_match_arguments() {
        let program = scale_program(false, 0);

        let err = execute(&program, (1, 1, 1), &mut [HostBuffer::zeros(F32, 4)]).unwrap_err();
        assert_eq!(
            err,
            ExecutionError::MissingBuffer {
                index: 1,
                available: 1
            }
        );

        let mut buffers = [HostBuffer::zeros(F32, 4), HostBuffer::zeros(I32, 4)];
        let err = execute(&program, (1, 1, 1), &mut buffers).unwrap_err();
        assert_eq!(
            err,
            ExecutionError::BufferType {
                index: 1,
                expected: F32,
                actual: I32
            }
        );
    }

    #[test]
    fn integer_division_by_zero_fails() {
        let mut builder = KernelBuilder::new("div");
        let pid = builder.program_id(ProgramAxis::Y);
        let one = builder.constant(1, Type::scalar(I32));
        builder.div(one, pid);
        let program = builder.build();

        let err = execute(&program, (1, 1, 1), &mut []).unwrap_err();
        assert!(matches!(err, ExecutionError::DivisionByZero { .. }));
    }

    #[test]
    fn loops_thread_carried_values() {
        let mut builder = KernelBuilder::new("sum");
        let out = builder.arg(Type::pointer(I32), None);
        let i32_ty = Type::scalar(I32);
        let start = builder.constant(0, i32_ty);
        let end = builder.constant(10, i32_ty);
        let step = builder.constant(3, i32_ty);
        let zero = builder.constant(0, i32_ty);

        let results = builder.for_loop(start, end, step, &[zero], |builder, i, carried| {
            vec![builder.add(carried[0], i)]
        });
        builder.store(out, results[0], None);
        let program = builder.build();

        let mut buffers = [HostBuffer::zeros(I32, 1)];
        execute(&program, (1, 1, 1), &mut buffers).unwrap();

        // 0 + 3 + 6 + 9
        assert_eq!(buffers[0].to_f64(), vec![18.0]);
    }

    #[test]
    fn dot_rounds_to_the_accumulator_type() {
        let f16 = Elem::Float(FloatKind::F16);
        let ty = Type::tile(f16, Shape::Matrix(16, 16));
        let mut builder = KernelBuilder::new("dot");
        let lhs = builder.constant(1.0, ty);
        let rhs = builder.constant(1.0, ty);
        let acc = builder.constant(2048.0, ty);
        let acc = builder.dot(lhs, rhs, acc, false);
        let program = builder.build();

        let mut stats = ExecutionStats::default();
        let mut instance = ProgramInstance {
            pid: [0, 0, 0],
            values: HashMap::new(),
            buffers: &mut [],
            stats: &mut stats,
        };
        instance.run_block(&program.body).unwrap();

        // 2048 + 1 rounds back to 2048 in half precision, sixteen times.
        let acc = &instance.values[&acc.id];
        assert!(acc.lanes.iter().all(|lane| *lane == Scalar::Float(2048.0)));
    }
}
