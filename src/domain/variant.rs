use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

/// Number of the variant created together with its network.
pub const INITIAL_VARIANT_NUM: i32 = 0;

/// Name of the variant created together with its network.
pub const INITIAL_VARIANT_NAME: &str = "InitialState";

/// How a variant stores its data.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum VariantMode {
    /// Self-contained: every effective row is a local row.
    Full,
    /// Overlay: local edits and tombstones on top of a FULL baseline variant.
    Partial,
}

/// Address of one variant of one network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct VariantRef {
    pub network_id: Uuid,
    pub num: i32,
}

impl VariantRef {
    pub fn new(network_id: Uuid, num: i32) -> Self {
        Self { network_id, num }
    }
}

impl std::fmt::Display for VariantRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.network_id, self.num)
    }
}

/// One entry of the variant directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantInfo {
    pub network_id: Uuid,
    pub num: i32,
    pub name: String,
    pub mode: VariantMode,
    /// Nearest FULL ancestor; equal to `num` for FULL variants.
    pub baseline_num: i32,
}

impl VariantInfo {
    /// The INITIAL variant of a freshly created network.
    pub fn initial(network_id: Uuid) -> Self {
        Self::full(network_id, INITIAL_VARIANT_NUM, INITIAL_VARIANT_NAME)
    }

    pub fn full(network_id: Uuid, num: i32, name: impl Into<String>) -> Self {
        Self {
            network_id,
            num,
            name: name.into(),
            mode: VariantMode::Full,
            baseline_num: num,
        }
    }

    /// A PARTIAL variant overlaying `source`. The baseline pointer is copied
    /// from the source so it always names a FULL variant.
    pub fn partial_of(source: &VariantInfo, num: i32, name: impl Into<String>) -> Self {
        Self {
            network_id: source.network_id,
            num,
            name: name.into(),
            mode: VariantMode::Partial,
            baseline_num: source.baseline_num,
        }
    }

    pub fn variant_ref(&self) -> VariantRef {
        VariantRef::new(self.network_id, self.num)
    }

    /// Address of the baseline variant (itself for FULL variants).
    pub fn baseline_ref(&self) -> VariantRef {
        VariantRef::new(self.network_id, self.baseline_num)
    }

    pub fn is_full(&self) -> bool {
        self.mode == VariantMode::Full
    }

    pub fn is_partial(&self) -> bool {
        self.mode == VariantMode::Partial
    }

    pub fn is_initial(&self) -> bool {
        self.num == INITIAL_VARIANT_NUM
    }

    /// The variant this one falls back to on a local miss, if any.
    pub fn baseline(&self) -> Option<i32> {
        match self.mode {
            VariantMode::Full => None,
            VariantMode::Partial => Some(self.baseline_num),
        }
    }

    /// Same directory entry under another network identity.
    pub fn with_network(&self, network_id: Uuid) -> Self {
        Self {
            network_id,
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_variant_is_its_own_baseline() {
        let info = VariantInfo::initial(Uuid::new_v4());
        assert!(info.is_full());
        assert!(info.is_initial());
        assert_eq!(info.baseline_num, INITIAL_VARIANT_NUM);
        assert_eq!(info.baseline(), None);
    }

    #[test]
    fn test_partial_of_partial_keeps_full_baseline() {
        let network = Uuid::new_v4();
        let v0 = VariantInfo::initial(network);
        let v1 = VariantInfo::partial_of(&v0, 1, "v1");
        let v2 = VariantInfo::partial_of(&v1, 2, "v2");
        assert_eq!(v1.baseline(), Some(0));
        assert_eq!(v2.baseline(), Some(0));
    }

    #[test]
    fn test_mode_text_form() {
        assert_eq!(VariantMode::Partial.to_string(), "PARTIAL");
        assert_eq!("FULL".parse::<VariantMode>().unwrap(), VariantMode::Full);
    }
}
