/// Emite una línea de ensamblador: opcode seguido de operandos con formato.
macro_rules! emit {
    ($context:expr, $opcode:expr) => {
        $context.push(String::from($opcode))
    };

    ($context:expr, $opcode:expr, $($format:tt)*) => {
        $context.push(format!("{} {}", $opcode, format_args!($($format)*)))
    };
}
