//! The transformer capability set and the ordered registry.

use std::rc::Rc;

use crate::constants::TypeCode;
use crate::content::{ClassDesc, Instance, JavaValue};
use crate::decoder::StreamDecoder;
use crate::error::StreamError;
use crate::transform::default::DefaultTransformer;

/// A policy that converts recognized class descriptors into a preferred
/// representation, and optionally takes over custom payload parsing.
///
/// All hooks have declining defaults, so an implementation only overrides
/// what it handles.
pub trait ObjectTransformer {
    /// Produces the instance for a recognized class descriptor, or `None`
    /// to let the next transformer (or the generic record fallback) take it.
    fn create_instance(&self, _class_desc: &ClassDesc) -> Option<Instance> {
        None
    }

    /// Consumes the opaque payload of an externalizable class written with
    /// block data. Returning `Ok(false)` passes to the next transformer; if
    /// no transformer accepts, the parse fails.
    fn load_from_blockdata(
        &self,
        _instance: &Instance,
        _decoder: &mut StreamDecoder<'_>,
    ) -> Result<bool, StreamError> {
        Ok(false)
    }

    /// Finalizes the representation once the whole instance (fields and
    /// annotations) has been read. Returning `Ok(true)` stops the chain.
    fn load_from_instance(
        &self,
        _instance: &Instance,
        _decoder: &mut StreamDecoder<'_>,
    ) -> Result<bool, StreamError> {
        Ok(false)
    }

    /// Reads the body of a primitive array wholesale, e.g. to hand it to a
    /// numeric library. Returning `Ok(None)` falls back to element-wise
    /// decoding.
    fn load_array(
        &self,
        _decoder: &mut StreamDecoder<'_>,
        _element_type: TypeCode,
        _length: usize,
    ) -> Result<Option<Vec<JavaValue>>, StreamError> {
        Ok(None)
    }

    /// Parses protocol-version-1 content produced by a custom `writeObject`.
    /// Consulted when raw (non-tag) data appears where content is expected;
    /// the decoder has been rewound to the first raw byte.
    fn load_custom_write_object(
        &self,
        _decoder: &mut StreamDecoder<'_>,
        _class_name: &str,
    ) -> Result<Option<ClassDesc>, StreamError> {
        Ok(None)
    }
}

/// The ordered transformer list: user transformers first, the default
/// transformer last.
#[derive(Clone)]
pub struct Transformers {
    user: Vec<Rc<dyn ObjectTransformer>>,
    default: Rc<DefaultTransformer>,
}

impl Default for Transformers {
    fn default() -> Self {
        Self::new()
    }
}

impl Transformers {
    pub fn new() -> Self {
        Self {
            user: Vec::new(),
            default: Rc::new(DefaultTransformer),
        }
    }

    /// Builds a registry with the given user transformers ahead of the
    /// default one.
    pub fn with_user(user: Vec<Rc<dyn ObjectTransformer>>) -> Self {
        Self {
            user,
            default: Rc::new(DefaultTransformer),
        }
    }

    /// Appends a user transformer (still ahead of the default one).
    pub fn push(&mut self, transformer: Rc<dyn ObjectTransformer>) {
        self.user.push(transformer);
    }

    /// The consultation order: user transformers, then the default.
    pub fn chain(&self) -> Vec<Rc<dyn ObjectTransformer>> {
        let mut chain: Vec<Rc<dyn ObjectTransformer>> = self.user.clone();
        chain.push(self.default.clone());
        chain
    }

    /// Creates the instance for a class descriptor. Never fails: when no
    /// transformer claims the class, a generic record instance is produced.
    pub fn create(&self, class_desc: &ClassDesc) -> Instance {
        for transformer in self.chain() {
            if let Some(instance) = transformer.create_instance(class_desc) {
                return instance;
            }
        }
        Instance::new(class_desc.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::SC_SERIALIZABLE;
    use crate::content::Representation;

    struct Claiming;

    impl ObjectTransformer for Claiming {
        fn create_instance(&self, class_desc: &ClassDesc) -> Option<Instance> {
            if &*class_desc.name() == "com.example.Custom" {
                let instance = Instance::new(class_desc.clone());
                instance.set_repr(Representation::Sequence(Vec::new()));
                Some(instance)
            } else {
                None
            }
        }
    }

    #[test]
    fn unclaimed_classes_fall_back_to_generic_records() {
        let registry = Transformers::new();
        let cd = ClassDesc::new("com.example.Unknown", 1);
        cd.set_flags(SC_SERIALIZABLE);
        let instance = registry.create(&cd);
        assert_eq!(instance.repr(), Representation::Record);
    }

    #[test]
    fn user_transformers_run_before_the_default() {
        let mut registry = Transformers::new();
        registry.push(Rc::new(Claiming));
        let cd = ClassDesc::new("com.example.Custom", 1);
        cd.set_flags(SC_SERIALIZABLE);
        let instance = registry.create(&cd);
        assert_eq!(instance.repr(), Representation::Sequence(Vec::new()));
    }

    #[test]
    fn default_known_classes_are_claimed_by_the_default_transformer() {
        let registry = Transformers::new();
        let cd = ClassDesc::new("java.util.HashMap", 1);
        cd.set_flags(SC_SERIALIZABLE);
        let instance = registry.create(&cd);
        assert_eq!(instance.repr(), Representation::Record);
        assert!(instance.class_desc().ptr_eq(&cd));
    }
}
