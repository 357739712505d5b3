//! The default transformer: idiomatic representations for the standard
//! library collections and the common primitive wrappers.

use crate::content::{ClassDesc, Instance, JavaValue, Representation};
use crate::decoder::StreamDecoder;
use crate::error::StreamError;
use crate::transform::types::ObjectTransformer;

const MAP_CLASSES: &[&str] = &[
    "java.util.HashMap",
    "java.util.Hashtable",
    "java.util.LinkedHashMap",
    "java.util.TreeMap",
];

const SEQUENCE_CLASSES: &[&str] = &[
    "java.util.ArrayList",
    "java.util.LinkedList",
    "java.util.Vector",
    "java.util.concurrent.ConcurrentLinkedQueue",
    "java.util.ArrayDeque",
];

const SET_CLASSES: &[&str] = &[
    "java.util.HashSet",
    "java.util.LinkedHashSet",
    "java.util.TreeSet",
];

const WRAPPER_CLASSES: &[&str] = &[
    "java.lang.Boolean",
    "java.lang.Byte",
    "java.lang.Character",
    "java.lang.Short",
    "java.lang.Integer",
    "java.lang.Long",
    "java.lang.Float",
    "java.lang.Double",
];

/// Ships the conversions for `java.util` collections and `java.lang`
/// primitive wrappers; everything else stays a generic record.
pub struct DefaultTransformer;

impl DefaultTransformer {
    /// `true` when the class decodes to something better than a record.
    pub fn recognizes(&self, name: &str) -> bool {
        MAP_CLASSES.contains(&name)
            || SEQUENCE_CLASSES.contains(&name)
            || SET_CLASSES.contains(&name)
            || WRAPPER_CLASSES.contains(&name)
    }
}

impl ObjectTransformer for DefaultTransformer {
    fn create_instance(&self, class_desc: &ClassDesc) -> Option<Instance> {
        if self.recognizes(&class_desc.name()) {
            Some(Instance::new(class_desc.clone()))
        } else {
            None
        }
    }

    fn load_from_instance(
        &self,
        instance: &Instance,
        decoder: &mut StreamDecoder<'_>,
    ) -> Result<bool, StreamError> {
        for (cd, annotations) in instance.annotations() {
            let name = cd.name();
            if MAP_CLASSES.contains(&&*name) {
                let pairs = collect_pairs(&annotations).ok_or_else(|| {
                    StreamError::TransformerFailed {
                        offset: decoder.position(),
                        class_name: name.to_string(),
                    }
                })?;
                instance.set_repr(Representation::Mapping(pairs));
                return Ok(true);
            }
            if SEQUENCE_CLASSES.contains(&&*name) {
                let values = collect_sequence(&name, &annotations, instance);
                instance.set_repr(Representation::Sequence(values));
                return Ok(true);
            }
            if SET_CLASSES.contains(&&*name) {
                let values = collect_set(&name, &annotations);
                instance.set_repr(Representation::Set(values));
                return Ok(true);
            }
        }

        let name = instance.class_desc().name();
        if WRAPPER_CLASSES.contains(&&*name) {
            if let Some(value) = instance.field("value") {
                instance.set_repr(Representation::Value(value));
                return Ok(true);
            }
        }

        Ok(false)
    }
}

/// Elements after the leading block(s) of capacity/load-factor/size data.
fn skip_leading_blocks(annotations: &[JavaValue]) -> &[JavaValue] {
    let mut start = 0;
    while matches!(annotations.get(start), Some(JavaValue::BlockData(_))) {
        start += 1;
    }
    &annotations[start..]
}

fn collect_pairs(annotations: &[JavaValue]) -> Option<Vec<(JavaValue, JavaValue)>> {
    let entries = skip_leading_blocks(annotations);
    if entries.len() % 2 != 0 {
        return None;
    }
    Some(
        entries
            .chunks_exact(2)
            .map(|pair| (pair[0].clone(), pair[1].clone()))
            .collect(),
    )
}

fn collect_sequence(name: &str, annotations: &[JavaValue], instance: &Instance) -> Vec<JavaValue> {
    let mut values = skip_leading_blocks(annotations).to_vec();
    if name == "java.util.concurrent.ConcurrentLinkedQueue" {
        // The queue terminates its element run with a null sentinel.
        if values.last().is_some_and(JavaValue::is_null) {
            values.pop();
        }
        return values;
    }
    if name == "java.util.Vector" && values.is_empty() {
        // Vector keeps its elements in the elementData field, padded with
        // nulls up to the backing capacity; elementCount gives the size.
        if let Some(array) = instance.field("elementData").as_ref().and_then(JavaValue::as_array) {
            let mut elements = array.values().unwrap_or_default();
            if let Some(JavaValue::Int(count)) = instance.field("elementCount") {
                elements.truncate(count.max(0) as usize);
            }
            return elements;
        }
    }
    values
}

fn collect_set(name: &str, annotations: &[JavaValue]) -> Vec<JavaValue> {
    if name == "java.util.TreeSet" {
        // A comparator object precedes the size block; elements start after
        // the first block.
        let first_block = annotations
            .iter()
            .position(|v| matches!(v, JavaValue::BlockData(_)));
        match first_block {
            Some(index) => annotations[index + 1..].to_vec(),
            None => Vec::new(),
        }
    } else {
        skip_leading_blocks(annotations).to_vec()
    }
}
