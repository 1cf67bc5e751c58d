use std::sync::OnceLock;

use crate::ConstantPool;

/// Names the shim agrees on with the loader and the runtime library.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    /// Global the loader sets to the real path of the module being loaded.
    pub realpath_global: String,
    /// Top-level constant answering exhaustiveness failures.
    pub absurd_namespace: String,
    pub absurd_method: String,
    /// Local that holds the active exception in rescue and ensure frames.
    pub exception_local: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            realpath_global: "$__native_shim_realpath".to_string(),
            absurd_namespace: "T".to_string(),
            absurd_method: "absurd".to_string(),
            exception_local: "#$!".to_string(),
        }
    }
}

#[derive(Debug, Default)]
pub struct Bridge {
    pub config: BridgeConfig,
    pub constants: ConstantPool,
}

static GLOBAL_BRIDGE: OnceLock<Bridge> = OnceLock::new();

impl Bridge {
    pub fn new(config: BridgeConfig) -> Self {
        Self {
            config,
            constants: ConstantPool::new(),
        }
    }

    /// The bridge generated code talks to, created with the default config on
    /// first use unless [`Bridge::install`] ran before.
    pub fn global() -> &'static Bridge {
        GLOBAL_BRIDGE.get_or_init(Bridge::default)
    }

    /// Sets the process-wide config. Returns `false` when the global bridge
    /// already exists.
    pub fn install(config: BridgeConfig) -> bool {
        GLOBAL_BRIDGE.set(Bridge::new(config)).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_loader_contract() {
        let config = BridgeConfig::default();
        assert_eq!(config.realpath_global, "$__native_shim_realpath");
        assert_eq!(config.exception_local, "#$!");
        assert_eq!(config.absurd_namespace, "T");
        assert_eq!(config.absurd_method, "absurd");
    }

    #[test]
    fn global_is_created_once() {
        let first = Bridge::global() as *const Bridge;
        assert!(!Bridge::install(BridgeConfig::default()));
        assert_eq!(first, Bridge::global() as *const Bridge);
    }
}
