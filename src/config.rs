//! Engine configuration.

/// Maximum number of public keys accepted by `OP_CHECKMULTISIG`.
pub const MAX_PUBKEYS_PER_MULTISIG: usize = 20;

const MAX_STACK_SIZE: usize = 1000;
const MAX_SCRIPT_SIZE: usize = 10_000;
const MAX_SCRIPT_ELEMENT_SIZE: usize = 520;
const MAX_OPS_PER_SCRIPT: usize = 201;

/// Resource limits and switches applied to every validation.
///
/// The size and count defaults match the limits Bitcoin Core enforces for
/// legacy scripts. Numeric operands are unbounded unless `max_num_len` is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Largest script, in bytes, the machine will execute.
    pub max_script_size: usize,
    /// Largest element a push may place on the stack.
    pub max_element_size: usize,
    /// Cap on executed non-push opcodes per script (multisig adds its key count).
    pub max_ops_per_script: usize,
    /// Cap on the combined depth of the main and alt stacks.
    pub max_stack_size: usize,
    /// Longest encoding accepted as a numeric operand, whether the value was
    /// pushed or computed. `None` leaves integers unbounded; Bitcoin Core uses 4.
    pub max_num_len: Option<usize>,
    /// Accept `SIGHASH_NONE`, `SIGHASH_SINGLE` and `SIGHASH_ANYONECANPAY`
    /// signatures. Off by default: only `SIGHASH_ALL` is verified.
    pub allow_experimental_sighash: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_script_size: MAX_SCRIPT_SIZE,
            max_element_size: MAX_SCRIPT_ELEMENT_SIZE,
            max_ops_per_script: MAX_OPS_PER_SCRIPT,
            max_stack_size: MAX_STACK_SIZE,
            max_num_len: None,
            allow_experimental_sighash: false,
        }
    }
}

impl EngineConfig {
    pub fn with_max_script_size(mut self, bytes: usize) -> Self {
        self.max_script_size = bytes;
        self
    }

    pub fn with_max_element_size(mut self, bytes: usize) -> Self {
        self.max_element_size = bytes;
        self
    }

    pub fn with_max_ops_per_script(mut self, ops: usize) -> Self {
        self.max_ops_per_script = ops;
        self
    }

    pub fn with_max_stack_size(mut self, depth: usize) -> Self {
        self.max_stack_size = depth;
        self
    }

    pub fn with_max_num_len(mut self, bytes: usize) -> Self {
        self.max_num_len = Some(bytes);
        self
    }

    pub fn with_experimental_sighash(mut self, enabled: bool) -> Self {
        self.allow_experimental_sighash = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_core_limits() {
        let config = EngineConfig::default();
        assert_eq!(config.max_ops_per_script, 201);
        assert_eq!(config.max_stack_size, 1000);
        assert_eq!(config.max_element_size, 520);
        assert_eq!(config.max_script_size, 10_000);
        assert_eq!(config.max_num_len, None);
        assert!(!config.allow_experimental_sighash);
    }

    #[test]
    fn builder_overrides_single_field() {
        let config = EngineConfig::default().with_max_ops_per_script(3);
        assert_eq!(config.max_ops_per_script, 3);
        assert_eq!(config.max_stack_size, 1000);
        assert_eq!(config.with_max_num_len(4).max_num_len, Some(4));
    }
}
