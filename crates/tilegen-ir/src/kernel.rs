use core::fmt::Display;

use crate::{Instruction, Operation, Value};

/// A pointer argument of a kernel.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(new, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KernelArg {
    pub value: Value,
    /// Guaranteed alignment of the argument, in bytes.
    pub divisibility: Option<u32>,
}

/// A complete tile program: one function executed by every program instance of a launch grid.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct KernelProgram {
    pub name: String,
    pub args: Vec<KernelArg>,
    pub body: Vec<Instruction>,
}

impl KernelProgram {
    /// Visit every instruction in program order, descending into loop bodies.
    ///
    /// The callback receives the loop nesting depth of each instruction.
    pub fn visit<F: FnMut(&Instruction, usize)>(&self, mut func: F) {
        fn visit_block<F: FnMut(&Instruction, usize)>(
            block: &[Instruction],
            depth: usize,
            func: &mut F,
        ) {
            for instruction in block {
                func(instruction, depth);
                if let Operation::For(for_loop) = &instruction.operation {
                    visit_block(&for_loop.body, depth + 1, func);
                }
            }
        }

        visit_block(&self.body, 0, &mut func);
    }

    /// Total number of instructions, loop bodies included.
    pub fn num_instructions(&self) -> usize {
        let mut count = 0;
        self.visit(|_, _| count += 1);
        count
    }
}

impl Display for KernelProgram {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "func @{}(", self.name)?;
        for (i, arg) in self.args.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}: {}", arg.value, arg.value.ty)?;
            if let Some(divisibility) = arg.divisibility {
                write!(f, " {{divisibility = {divisibility}}}")?;
            }
        }
        f.write_str(") {\n")?;
        fmt_block(f, &self.body, 1)?;
        f.write_str("}\n")
    }
}

fn fmt_block(
    f: &mut core::fmt::Formatter<'_>,
    block: &[Instruction],
    depth: usize,
) -> core::fmt::Result {
    let indent = "  ".repeat(depth);

    for instruction in block {
        match &instruction.operation {
            Operation::For(for_loop) => {
                f.write_str(&indent)?;
                write_values(f, &for_loop.results)?;
                if !for_loop.results.is_empty() {
                    f.write_str(" = ")?;
                }
                write!(f, "{} iter_args(", instruction.operation)?;
                for (i, (carried, init)) in for_loop.carried.iter().zip(&for_loop.init).enumerate()
                {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{carried} = {init}")?;
                }
                f.write_str(") {\n")?;
                fmt_block(f, &for_loop.body, depth + 1)?;
                write!(f, "{indent}  yield ")?;
                write_values(f, &for_loop.yielded)?;
                writeln!(f, "\n{indent}}}")?;
            }
            operation => match instruction.out {
                Some(out) => writeln!(f, "{indent}{out} = {operation} : {}", out.ty)?,
                None => writeln!(f, "{indent}{operation}")?,
            },
        }
    }

    Ok(())
}

fn write_values(f: &mut core::fmt::Formatter<'_>, values: &[Value]) -> core::fmt::Result {
    for (i, value) in values.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{value}")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::{FloatKind, IntKind, KernelBuilder, ProgramAxis, Shape, Type};

    #[test]
    fn printer_shows_signature_and_nesting() {
        let mut builder = KernelBuilder::new("copy");
        let ptr = builder.arg(Type::pointer(FloatKind::F32), Some(16));
        let pid = builder.program_id(ProgramAxis::X);
        let zero = builder.constant(0, Type::scalar(IntKind::I32));
        builder.for_loop(zero, pid, pid, &[], |_, _, _| Vec::new());
        let splat = builder.splat(ptr, Shape::Vector(4));
        let loaded = builder.load(splat, None, None);
        builder.store(splat, loaded, None);
        let program = builder.build();

        let text = program.to_string();
        assert!(text.starts_with("func @copy(%0: ptr<f32> {divisibility = 16}) {\n"));
        assert!(text.contains("  %1 = program_id x : i32\n"));
        assert!(text.contains("  for %3 = %2 to %1 step %1 iter_args() {\n"));
        assert!(text.contains("  store %4, %5\n"));
        assert_eq!(program.num_instructions(), 6);
    }
}
