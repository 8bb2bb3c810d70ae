//! Reassembly capability and its contract guard
//!
//! A reassembly object is created from a raw task, lists the fragments the
//! task needs, accepts each fragment once by index and finally packs the
//! part. [`ReassemblyHandle`] enforces the call order so implementations can
//! assume it.

use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use crate::message::Task;
use crate::planner::bundle_fragments;

/// Reassembly contract violations and implementation failures
#[derive(Debug, Error)]
pub enum ReassemblyError {
    #[error("no reassembly for function {0:?}")]
    UnknownKind(String),

    #[error("unable to initialise reassembly: {0}")]
    Init(String),

    #[error("unable to enumerate fragments: {0}")]
    Enumerate(String),

    #[error("fragment {index} rejected: {message}")]
    Add { index: usize, message: String },

    #[error("fragment {0} delivered twice")]
    DuplicateIndex(usize),

    #[error("fragment index {index} out of range (0..{len})")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("pack called with {added} of {expected} fragments")]
    Incomplete { added: usize, expected: usize },

    #[error("unable to pack part: {0}")]
    Pack(String),
}

/// One part's reassembly state
pub trait Reassembly: Send + Sync {
    /// Ids of the fragments to fetch, in index order
    fn fragments(&mut self) -> Result<Vec<String>, ReassemblyError>;

    /// Place the fragment with the given index
    fn add(&mut self, index: usize, chunk: &[u8]) -> Result<(), ReassemblyError>;

    /// Produce the packed part
    fn pack(&mut self) -> Result<Vec<u8>, ReassemblyError>;

    /// Free any resources held outside Rust's ownership
    fn release(&mut self) {}
}

/// Constructor for reassembly objects, keyed by function kind
pub trait ReassemblyFactory: Send + Sync {
    fn init(&self, task: &Task, raw: &[u8]) -> Result<Box<dyn Reassembly>, ReassemblyError>;
}

type Constructor =
    Arc<dyn Fn(&Task, &[u8]) -> Result<Box<dyn Reassembly>, ReassemblyError> + Send + Sync>;

/// Factory that dispatches on `Task::function`
#[derive(Clone, Default)]
pub struct KindRegistry {
    kinds: HashMap<String, Constructor>,
}

impl KindRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in kind
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(BundleReassembly::KIND, |task, _raw| {
            Ok(Box::new(BundleReassembly::from_task(task)?) as Box<dyn Reassembly>)
        });
        registry
    }

    pub fn register<F>(&mut self, kind: &str, constructor: F)
    where
        F: Fn(&Task, &[u8]) -> Result<Box<dyn Reassembly>, ReassemblyError> + Send + Sync + 'static,
    {
        self.kinds.insert(kind.to_string(), Arc::new(constructor));
    }
}

impl ReassemblyFactory for KindRegistry {
    fn init(&self, task: &Task, raw: &[u8]) -> Result<Box<dyn Reassembly>, ReassemblyError> {
        let constructor = self
            .kinds
            .get(&task.function)
            .ok_or_else(|| ReassemblyError::UnknownKind(task.function.clone()))?;
        constructor(task, raw)
    }
}

/// Scoped owner of a reassembly object
///
/// Fragments are enumerated exactly once, every index is added exactly once,
/// pack runs only after the last add, and the object is released exactly
/// once: after packing, or when the handle is dropped.
pub struct ReassemblyHandle {
    inner: Option<Box<dyn Reassembly>>,
    added: Option<Vec<bool>>,
    remaining: usize,
}

impl ReassemblyHandle {
    pub fn new(inner: Box<dyn Reassembly>) -> Self {
        Self {
            inner: Some(inner),
            added: None,
            remaining: 0,
        }
    }

    fn inner(&mut self) -> Result<&mut Box<dyn Reassembly>, ReassemblyError> {
        self.inner
            .as_mut()
            .ok_or_else(|| ReassemblyError::Pack("reassembly already released".into()))
    }

    /// List the fragments; a second call is an error
    pub fn enumerate(&mut self) -> Result<Vec<String>, ReassemblyError> {
        if self.added.is_some() {
            return Err(ReassemblyError::Enumerate("fragments already enumerated".into()));
        }
        let ids = self.inner()?.fragments()?;
        self.added = Some(vec![false; ids.len()]);
        self.remaining = ids.len();
        Ok(ids)
    }

    pub fn add(&mut self, index: usize, chunk: &[u8]) -> Result<(), ReassemblyError> {
        let added = self
            .added
            .as_ref()
            .ok_or_else(|| ReassemblyError::Enumerate("add before enumerate".into()))?;
        match added.get(index) {
            None => {
                return Err(ReassemblyError::IndexOutOfRange {
                    index,
                    len: added.len(),
                })
            }
            Some(true) => return Err(ReassemblyError::DuplicateIndex(index)),
            Some(false) => {}
        }

        self.inner()?.add(index, chunk)?;
        if let Some(added) = self.added.as_mut() {
            added[index] = true;
        }
        self.remaining -= 1;
        Ok(())
    }

    /// Whether every enumerated fragment has been added
    pub fn is_complete(&self) -> bool {
        self.added.is_some() && self.remaining == 0
    }

    /// Pack the part and release the reassembly object
    pub fn pack(mut self) -> Result<Vec<u8>, ReassemblyError> {
        let expected = self.added.as_ref().map_or(0, Vec::len);
        if !self.is_complete() {
            return Err(ReassemblyError::Incomplete {
                added: expected - self.remaining,
                expected,
            });
        }
        let packed = self.inner()?.pack();
        self.release();
        packed
    }

    fn release(&mut self) {
        if let Some(mut inner) = self.inner.take() {
            inner.release();
        }
    }
}

impl Drop for ReassemblyHandle {
    fn drop(&mut self) {
        self.release();
    }
}

/// Concatenates a list of named fragments
///
/// The packed part is a msgpack array with one `bin` element per fragment,
/// in enumeration order regardless of arrival order.
#[derive(Debug)]
pub struct BundleReassembly {
    ids: Vec<String>,
    chunks: Vec<Option<Vec<u8>>>,
}

impl BundleReassembly {
    pub const KIND: &'static str = "bundle";

    pub fn from_task(task: &Task) -> Result<Self, ReassemblyError> {
        let fragments = bundle_fragments(&task.params).ok_or_else(|| {
            ReassemblyError::Init("params.fragments must be a list of names".into())
        })?;
        let ids: Vec<String> = fragments.iter().map(|f| task.blob_id(f)).collect();
        let chunks = vec![None; ids.len()];
        Ok(Self { ids, chunks })
    }
}

impl Reassembly for BundleReassembly {
    fn fragments(&mut self) -> Result<Vec<String>, ReassemblyError> {
        Ok(self.ids.clone())
    }

    fn add(&mut self, index: usize, chunk: &[u8]) -> Result<(), ReassemblyError> {
        let len = self.chunks.len();
        let slot = self
            .chunks
            .get_mut(index)
            .ok_or(ReassemblyError::IndexOutOfRange { index, len })?;
        *slot = Some(chunk.to_vec());
        Ok(())
    }

    fn pack(&mut self) -> Result<Vec<u8>, ReassemblyError> {
        let size: usize = self.chunks.iter().flatten().map(|c| c.len() + 5).sum();
        let mut out = Vec::with_capacity(size + 5);
        rmp::encode::write_array_len(&mut out, self.chunks.len() as u32)
            .map_err(|e| ReassemblyError::Pack(e.to_string()))?;
        for (index, chunk) in self.chunks.iter().enumerate() {
            let chunk = chunk.as_ref().ok_or(ReassemblyError::Incomplete {
                added: index,
                expected: self.chunks.len(),
            })?;
            rmp::encode::write_bin(&mut out, chunk)
                .map_err(|e| ReassemblyError::Pack(e.to_string()))?;
        }
        Ok(out)
    }

    fn release(&mut self) {
        self.chunks.clear();
    }
}
