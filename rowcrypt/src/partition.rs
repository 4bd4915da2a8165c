//! Partition naming: deterministic key identifiers for the system and
//! intermediate tiers.

use std::fmt;

/// Derives key identifiers for a (product, service, partition) triple.
///
/// Identifiers are pure functions of the attributes; implementations hold no
/// mutable state.
pub trait Partition: Send + Sync + fmt::Debug {
    /// The system key id for this partition's service/product pair.
    fn system_key_id(&self) -> String;

    /// The intermediate key id for this partition.
    fn intermediate_key_id(&self) -> String;

    /// True if `id` may serve as this partition's intermediate key id on
    /// decrypt, including region-suffix variants.
    fn is_valid_intermediate_key_id(&self, id: &str) -> bool;

    /// True if `id` may serve as this partition's system key id on decrypt,
    /// including region-suffix variants.
    fn is_valid_system_key_id(&self, id: &str) -> bool;
}

/// True when `candidate` equals `base` or is `base` followed by a
/// `_<suffix>` region marker. Records written with or without a suffix stay
/// decryptable either way.
fn matches_with_optional_suffix(candidate: &str, base: &str) -> bool {
    candidate == base
        || candidate
            .strip_prefix(base)
            .is_some_and(|rest| rest.starts_with('_'))
}

/// Partition without a region suffix.
#[derive(Debug, Clone)]
pub struct DefaultPartition {
    id: String,
    service: String,
    product: String,
}

impl DefaultPartition {
    pub fn new(
        partition_id: impl Into<String>,
        service: impl Into<String>,
        product: impl Into<String>,
    ) -> Self {
        Self {
            id: partition_id.into(),
            service: service.into(),
            product: product.into(),
        }
    }
}

impl Partition for DefaultPartition {
    fn system_key_id(&self) -> String {
        format!("_SK_{}_{}", self.service, self.product)
    }

    fn intermediate_key_id(&self) -> String {
        format!("_IK_{}_{}_{}", self.id, self.service, self.product)
    }

    fn is_valid_intermediate_key_id(&self, id: &str) -> bool {
        matches_with_optional_suffix(id, &self.intermediate_key_id())
    }

    fn is_valid_system_key_id(&self, id: &str) -> bool {
        matches_with_optional_suffix(id, &self.system_key_id())
    }
}

/// Partition with a region suffix appended to its key identifiers.
///
/// For decrypt the unsuffixed identifiers remain acceptable so records
/// written before a suffix was configured stay readable.
#[derive(Debug, Clone)]
pub struct SuffixedPartition {
    inner: DefaultPartition,
    suffix: String,
}

impl SuffixedPartition {
    pub fn new(
        partition_id: impl Into<String>,
        service: impl Into<String>,
        product: impl Into<String>,
        suffix: impl Into<String>,
    ) -> Self {
        Self {
            inner: DefaultPartition::new(partition_id, service, product),
            suffix: suffix.into(),
        }
    }
}

impl Partition for SuffixedPartition {
    fn system_key_id(&self) -> String {
        format!("{}_{}", self.inner.system_key_id(), self.suffix)
    }

    fn intermediate_key_id(&self) -> String {
        format!("{}_{}", self.inner.intermediate_key_id(), self.suffix)
    }

    fn is_valid_intermediate_key_id(&self, id: &str) -> bool {
        matches_with_optional_suffix(id, &self.inner.intermediate_key_id())
    }

    fn is_valid_system_key_id(&self, id: &str) -> bool {
        matches_with_optional_suffix(id, &self.inner.system_key_id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_partition_ids() {
        let partition = DefaultPartition::new("id123", "service", "product");
        assert_eq!(partition.system_key_id(), "_SK_service_product");
        assert_eq!(partition.intermediate_key_id(), "_IK_id123_service_product");
    }

    #[test]
    fn default_partition_validation() {
        let partition = DefaultPartition::new("id123", "service", "product");
        assert!(partition.is_valid_intermediate_key_id("_IK_id123_service_product"));
        assert!(!partition.is_valid_intermediate_key_id("_IK_wrong_service_product"));
        assert!(partition.is_valid_system_key_id("_SK_service_product"));
        assert!(!partition.is_valid_system_key_id("_SK_other_product"));
    }

    #[test]
    fn default_partition_accepts_suffixed_ids() {
        let partition = DefaultPartition::new("id123", "service", "product");
        assert!(partition.is_valid_intermediate_key_id("_IK_id123_service_product_east"));
        assert!(partition.is_valid_system_key_id("_SK_service_product_east"));
        // A different partition id must not match via the suffix rule.
        assert!(!partition.is_valid_intermediate_key_id("_IK_id1234_service_product"));
    }

    #[test]
    fn suffixed_partition_ids() {
        let partition = SuffixedPartition::new("id123", "service", "product", "east");
        assert_eq!(partition.system_key_id(), "_SK_service_product_east");
        assert_eq!(
            partition.intermediate_key_id(),
            "_IK_id123_service_product_east"
        );
    }

    #[test]
    fn suffixed_partition_accepts_unsuffixed_ids() {
        let partition = SuffixedPartition::new("id123", "service", "product", "east");
        assert!(partition.is_valid_intermediate_key_id("_IK_id123_service_product_east"));
        assert!(partition.is_valid_intermediate_key_id("_IK_id123_service_product"));
        assert!(partition.is_valid_system_key_id("_SK_service_product"));
        assert!(!partition.is_valid_intermediate_key_id("_IK_other_service_product"));
    }
}
