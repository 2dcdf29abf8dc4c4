/// Tunables of the matmul lowering.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct LoweringConfig {
    /// Largest accepted value of the tiling complexity heuristic.
    #[serde(default = "complexity_limit_default")]
    pub complexity_limit: u64,

    /// Rows of tiles walked together by the tile swizzle.
    #[serde(default = "group_m_default")]
    pub group_m: u32,

    /// Alignment in bytes promised for every kernel argument.
    #[serde(default = "argument_alignment_default")]
    pub argument_alignment: u32,

    /// Whether dots may use reduced precision tensor float 32 arithmetic.
    #[serde(default = "allow_tf32_default")]
    pub allow_tf32: bool,
}

impl Default for LoweringConfig {
    fn default() -> Self {
        Self {
            complexity_limit: complexity_limit_default(),
            group_m: group_m_default(),
            argument_alignment: argument_alignment_default(),
            allow_tf32: allow_tf32_default(),
        }
    }
}

fn complexity_limit_default() -> u64 {
    9000
}

fn group_m_default() -> u32 {
    8
}

fn argument_alignment_default() -> u32 {
    16
}

fn allow_tf32_default() -> bool {
    true
}
