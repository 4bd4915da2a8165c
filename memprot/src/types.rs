/// Page protection states used by the secret lifecycle.
///
/// Secrets rest at `NoAccess`, are raised to `ReadOnly` while a scoped read
/// is active, and only become `ReadWrite` for wiping before release.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageProtection {
    /// Memory cannot be read, written, or executed.
    NoAccess,

    /// Memory can be read but not written or executed.
    ReadOnly,

    /// Memory can be read and written but not executed.
    ReadWrite,
}

/// Resource limit identifiers used with `set_limit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RlimitResource {
    /// Maximum size of the process's data segment.
    Data,

    /// Maximum size of a core file.
    Core,

    /// Maximum size that may be locked into memory.
    MemLock,
}
