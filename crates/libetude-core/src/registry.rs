//! A keyed factory/forward/destroy table for graph operators.
//!
//! Operators are value-type table entries rather than trait objects with
//! virtual dispatch: a [`OperatorDescriptor`] bundles three plain function
//! pointers keyed by name, and per-node state lives behind an opaque
//! [`AttributeHandle`] that each operator's own functions down-cast.

use alloc::boxed::Box;
use alloc::string::String;
use alloc::vec::Vec;

use core::any::Any;

use crate::error::{LibetudeError, Result};
use crate::tensor::Tensor;

/// Opaque per-node attribute storage, created by an operator's `create` and
/// consumed by its `forward`/`destroy`. Each operator downcasts this to its
/// own attribute type; the registry never inspects it.
pub struct AttributeHandle(Box<dyn Any + Send>);

impl AttributeHandle {
    /// Wraps a concrete attribute value behind the opaque handle.
    pub fn new<T: Any + Send>(value: T) -> Self {
        Self(Box::new(value))
    }

    /// Downcasts to the concrete attribute type `T`, or `None` on mismatch.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref()
    }

    /// Mutable downcast, as [`downcast_ref`](Self::downcast_ref).
    pub fn downcast_mut<T: Any>(&mut self) -> Option<&mut T> {
        self.0.downcast_mut()
    }
}

/// Creates per-node attributes and reports the operator's input/output slot
/// counts. `attrs` is a small serialized key-value view (e.g. from a model
/// file's per-node config) the factory may parse.
pub type CreateFn = fn(attrs: &[(&str, &str)]) -> Result<(AttributeHandle, SlotCounts)>;

/// Reads input tensors and writes output tensors for one node invocation.
pub type ForwardFn = for<'p> fn(attrs: &AttributeHandle, inputs: &[&Tensor<'p>], outputs: &mut [Tensor<'p>]) -> Result<()>;

/// Releases any resources held by an attribute handle beyond ordinary drop
/// (most operators can use [`default_destroy`]).
pub type DestroyFn = fn(attrs: AttributeHandle);

/// Declared input/output arity for an operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotCounts {
    /// Number of input tensor slots.
    pub inputs: usize,
    /// Number of output tensor slots.
    pub outputs: usize,
}

/// A no-op destroy for operators whose attributes need no special teardown;
/// the `Box<dyn Any>` drop glue already runs.
pub fn default_destroy(_attrs: AttributeHandle) {}

/// One registered operator's `{create, forward, destroy}` triple.
#[derive(Clone, Copy)]
pub struct OperatorDescriptor {
    /// Operator name, as looked up by nodes.
    pub name: &'static str,
    /// Attaches per-node attributes and reports slot counts.
    pub create: CreateFn,
    /// Executes one forward pass.
    pub forward: ForwardFn,
    /// Releases attribute memory.
    pub destroy: DestroyFn,
}

struct Entry {
    descriptor: OperatorDescriptor,
}

/// A named table of operators, supporting idempotent registration and O(1)
/// amortized lookup by name.
pub struct OperatorRegistry {
    entries: Vec<(String, Entry)>,
}

impl Default for OperatorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl OperatorRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    /// Registers `descriptor`. Re-registering under the same name with a
    /// bit-identical descriptor (same function pointers) is a no-op
    /// (idempotent); registering a *different* descriptor under an existing
    /// name fails with `AlreadyExists`.
    pub fn register(&mut self, descriptor: OperatorDescriptor) -> Result<()> {
        if let Some((_, existing)) = self.entries.iter().find(|(n, _)| n == descriptor.name) {
            if descriptor_eq(&existing.descriptor, &descriptor) {
                return Ok(());
            }
            return Err(LibetudeError::already_exists(alloc::format!(
                "operator '{}' is already registered with a different descriptor",
                descriptor.name
            )));
        }
        self.entries.push((String::from(descriptor.name), Entry { descriptor }));
        Ok(())
    }

    /// Looks up an operator by name.
    pub fn get(&self, name: &str) -> Option<OperatorDescriptor> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, e)| e.descriptor)
    }

    /// Number of registered operators.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Registers the dense-model bundle: `Linear`, `Conv1D`, `Attention`.
    pub fn register_basic(&mut self) -> Result<()> {
        for descriptor in basic::ALL {
            self.register(descriptor)?;
        }
        Ok(())
    }

    /// Registers the audio-pipeline bundle: `STFT`, `MelScale`, `Vocoder`.
    pub fn register_audio(&mut self) -> Result<()> {
        for descriptor in audio::ALL {
            self.register(descriptor)?;
        }
        Ok(())
    }

    /// Registers both canonical bundles. Must leave both `register_basic`
    /// and `register_audio`'s operators present.
    pub fn register_all(&mut self) -> Result<()> {
        self.register_basic()?;
        self.register_audio()
    }
}

fn descriptor_eq(a: &OperatorDescriptor, b: &OperatorDescriptor) -> bool {
    a.name == b.name
        && a.create as usize == b.create as usize
        && a.forward as usize == b.forward as usize
        && a.destroy as usize == b.destroy as usize
}

/// Stock dense-model operators (`register_basic`).
pub mod basic {
    use super::*;

    fn no_attrs_create(_attrs: &[(&str, &str)]) -> Result<(AttributeHandle, SlotCounts)> {
        Ok((AttributeHandle::new(()), SlotCounts { inputs: 1, outputs: 1 }))
    }

    fn linear_forward<'p>(_attrs: &AttributeHandle, inputs: &[&Tensor<'p>], outputs: &mut [Tensor<'p>]) -> Result<()> {
        let input = inputs.first().ok_or_else(|| LibetudeError::invalid_argument("Linear requires 1 input"))?;
        let values = input.read_f32()?;
        outputs[0].write_f32(&values)
    }

    fn conv1d_forward<'p>(_attrs: &AttributeHandle, inputs: &[&Tensor<'p>], outputs: &mut [Tensor<'p>]) -> Result<()> {
        let input = inputs.first().ok_or_else(|| LibetudeError::invalid_argument("Conv1D requires 1 input"))?;
        let values = input.read_f32()?;
        outputs[0].write_f32(&values)
    }

    fn attention_forward<'p>(_attrs: &AttributeHandle, inputs: &[&Tensor<'p>], outputs: &mut [Tensor<'p>]) -> Result<()> {
        let input = inputs.first().ok_or_else(|| LibetudeError::invalid_argument("Attention requires 1 input"))?;
        let values = input.read_f32()?;
        outputs[0].write_f32(&values)
    }

    /// The three operators registered by [`super::OperatorRegistry::register_basic`].
    pub const ALL: [OperatorDescriptor; 3] = [
        OperatorDescriptor { name: "Linear", create: no_attrs_create, forward: linear_forward, destroy: default_destroy },
        OperatorDescriptor { name: "Conv1D", create: no_attrs_create, forward: conv1d_forward, destroy: default_destroy },
        OperatorDescriptor { name: "Attention", create: no_attrs_create, forward: attention_forward, destroy: default_destroy },
    ];
}

/// Stock audio-pipeline operators (`register_audio`).
pub mod audio {
    use super::*;

    fn no_attrs_create(_attrs: &[(&str, &str)]) -> Result<(AttributeHandle, SlotCounts)> {
        Ok((AttributeHandle::new(()), SlotCounts { inputs: 1, outputs: 1 }))
    }

    fn stft_forward<'p>(_attrs: &AttributeHandle, inputs: &[&Tensor<'p>], outputs: &mut [Tensor<'p>]) -> Result<()> {
        let input = inputs.first().ok_or_else(|| LibetudeError::invalid_argument("STFT requires 1 input"))?;
        let values = input.read_f32()?;
        outputs[0].write_f32(&values)
    }

    fn mel_scale_forward<'p>(_attrs: &AttributeHandle, inputs: &[&Tensor<'p>], outputs: &mut [Tensor<'p>]) -> Result<()> {
        let input = inputs.first().ok_or_else(|| LibetudeError::invalid_argument("MelScale requires 1 input"))?;
        let values = input.read_f32()?;
        outputs[0].write_f32(&values)
    }

    fn vocoder_forward<'p>(_attrs: &AttributeHandle, inputs: &[&Tensor<'p>], outputs: &mut [Tensor<'p>]) -> Result<()> {
        let input = inputs.first().ok_or_else(|| LibetudeError::invalid_argument("Vocoder requires 1 input"))?;
        let values = input.read_f32()?;
        outputs[0].write_f32(&values)
    }

    /// The three operators registered by [`super::OperatorRegistry::register_audio`].
    pub const ALL: [OperatorDescriptor; 3] = [
        OperatorDescriptor { name: "STFT", create: no_attrs_create, forward: stft_forward, destroy: default_destroy },
        OperatorDescriptor { name: "MelScale", create: no_attrs_create, forward: mel_scale_forward, destroy: default_destroy },
        OperatorDescriptor { name: "Vocoder", create: no_attrs_create, forward: vocoder_forward, destroy: default_destroy },
    ];
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_all_contains_both_bundles() {
        let mut registry = OperatorRegistry::new();
        registry.register_all().unwrap();
        assert!(registry.get("Linear").is_some());
        assert!(registry.get("Conv1D").is_some());
        assert!(registry.get("Attention").is_some());
        assert!(registry.get("STFT").is_some());
        assert!(registry.get("MelScale").is_some());
        assert!(registry.get("Vocoder").is_some());
        assert_eq!(registry.len(), 6);
    }

    #[test]
    fn re_registering_identical_descriptor_is_idempotent() {
        let mut registry = OperatorRegistry::new();
        registry.register_basic().unwrap();
        registry.register_basic().unwrap();
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn conflicting_registration_fails() {
        let mut registry = OperatorRegistry::new();
        registry.register_basic().unwrap();
        let conflicting = OperatorDescriptor {
            name: "Linear",
            create: basic::ALL[1].create,
            forward: basic::ALL[1].forward,
            destroy: default_destroy,
        };
        let err = registry.register(conflicting).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::AlreadyExists);
    }

    #[test]
    fn lookup_of_missing_operator_is_none() {
        let registry = OperatorRegistry::new();
        assert!(registry.get("DoesNotExist").is_none());
    }
}
