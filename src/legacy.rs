use crate::config::LegacyConfig;

/// Maps an original field name to the name under which the pre-migration
/// column was preserved.
///
/// The mapping is `<prefix>_<release with '.' replaced by '_'>_<field>`, so
/// with the defaults `valuation` resolves to
/// `openupgrade_legacy_8_0_valuation`. Step code and cleanup code both go
/// through the resolver so they always agree on the derived name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyNameResolver {
    stem: String,
}

impl LegacyNameResolver {
    pub fn new(prefix: &str, release: &str) -> Self {
        let release = release.trim().replace('.', "_");
        let stem = if release.is_empty() {
            format!("{}_", prefix.trim())
        } else {
            format!("{}_{}_", prefix.trim(), release)
        };
        LegacyNameResolver { stem }
    }

    pub fn from_config(config: &LegacyConfig) -> Self {
        Self::new(&config.prefix, &config.release)
    }

    pub fn legacy_name(&self, original_field_name: &str) -> String {
        format!("{}{}", self.stem, original_field_name)
    }

    /// Inverse of [`legacy_name`](Self::legacy_name), for reporting leftover columns.
    pub fn original_name<'a>(&self, legacy_name: &'a str) -> Option<&'a str> {
        legacy_name
            .strip_prefix(self.stem.as_str())
            .filter(|rest| !rest.is_empty())
    }
}

impl Default for LegacyNameResolver {
    fn default() -> Self {
        Self::from_config(&LegacyConfig::default())
    }
}
