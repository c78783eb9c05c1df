//! Narrow interfaces onto the kernel object store and run queue. Both
//! are owned and implemented elsewhere; `RemoteHandle` only ever calls
//! through these traits, never assumes a concrete object graph.

use serde_json::Value;

/// Translates between this remote's endpoint-scoped `ERef`s and the
/// owning kernel's global `KRef`s (ERef-KRef translation table).
pub trait KernelObjectStore {
    /// Resolve a previously-exported `ERef` (one this kernel sent
    /// outbound, named as an export in an earlier `deliver`/`notify`) to
    /// its `KRef`. Returns `None` if the eref is unknown for this
    /// remote, which the caller treats as a protocol violation.
    fn eref_to_kref(&self, remote_id: &str, eref: &str) -> Option<String>;

    /// Resolve (importing on first use) a `KRef` this kernel holds onto
    /// the `ERef` string to use when addressing it to this remote.
    fn kref_to_eref(&mut self, remote_id: &str, kref: &str) -> String;

    /// Allocate a fresh `ERef` for a value being exported to this remote
    /// for the first time (e.g. a promise result reference).
    fn export_new(&mut self, remote_id: &str, kref: &str) -> String;
}

/// The run-queue / GC operations spec §4.1.4 cross-wires into the
/// incoming path: delivering a method call, resolving promises, and the
/// three GC notifications (`dropExports`/`retireExports`/`retireImports`).
pub trait KernelQueue {
    /// Enqueue a method send on `target` with `methargs`, to run on the
    /// kernel's own turn. `result` is the `ERef` of the promise for the
    /// call's outcome, if the sender cared about it.
    fn enqueue_send(&mut self, remote_id: &str, target: &str, methargs: Value, result: Option<String>);

    /// Resolve or reject a set of previously-exported promises.
    /// `rejected` is paired index-for-index with `promise_erefs`.
    fn resolve_promises(&mut self, remote_id: &str, resolutions: Vec<(String, bool, Value)>);

    /// The remote no longer holds outstanding references to these
    /// `ERef`s; they may be dropped once no other remote holds them.
    fn drop_imports(&mut self, remote_id: &str, erefs: Vec<String>);

    /// The remote will never again ask to resolve these exported
    /// promises; free any bookkeeping kept for late resolution.
    fn retire_exports(&mut self, remote_id: &str, erefs: Vec<String>);

    /// The remote has released its last reference to these imports;
    /// this kernel's own import table entries may be retired.
    fn retire_imports(&mut self, remote_id: &str, erefs: Vec<String>);
}
