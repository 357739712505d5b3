//! The stream encoder: a limited writer sufficient to emit scalar, string
//! and collection graphs that `ObjectInputStream` (and this crate's own
//! decoder) can read back.
//!
//! Back-references are keyed by entity identity and numbered exactly the way
//! the decoder numbers handles, so references written here resolve to the
//! right entities on the way back in. Custom `writeObject` emulation is not
//! attempted: externalizable instances and proxy descriptors are rejected.

use log::debug;

use jserial_buffers::Writer;

use crate::constants::*;
use crate::content::{
    ArrayData, ClassDataLayout, ClassDesc, ClassDescKind, Instance, JavaField, JavaValue,
    Representation,
};
use crate::error::StreamError;
use crate::mutf8;

/// Encoder producing one serialization stream per [`StreamEncoder::encode`]
/// call.
#[derive(Default)]
pub struct StreamEncoder {
    writer: Writer,
    refs: Vec<JavaValue>,
    sequence_desc: Option<ClassDesc>,
    mapping_desc: Option<ClassDesc>,
    wrapper_descs: Vec<(&'static str, ClassDesc)>,
    number_desc: Option<ClassDesc>,
}

impl StreamEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Encodes one top-level value, preceded by the stream magic/version.
    pub fn encode(&mut self, value: &JavaValue) -> Result<Vec<u8>, StreamError> {
        self.writer.reset();
        self.refs.clear();
        self.writer.u16(STREAM_MAGIC);
        self.writer.u16(STREAM_VERSION);
        self.write_content(value)?;
        Ok(self.writer.flush())
    }

    /// Encodes several top-level values into one stream.
    pub fn encode_all(&mut self, values: &[JavaValue]) -> Result<Vec<u8>, StreamError> {
        self.writer.reset();
        self.refs.clear();
        self.writer.u16(STREAM_MAGIC);
        self.writer.u16(STREAM_VERSION);
        for value in values {
            self.write_content(value)?;
        }
        Ok(self.writer.flush())
    }

    fn unsupported(&self, reason: impl Into<String>) -> StreamError {
        StreamError::unsupported(self.writer.len(), reason)
    }

    fn write_content(&mut self, value: &JavaValue) -> Result<(), StreamError> {
        debug!("writing {} at {}", value.kind_name(), self.writer.len());
        match value {
            JavaValue::Null => {
                self.writer.u8(TC_NULL);
                Ok(())
            }
            // A bare primitive travels as block data, the way
            // DataOutputStream would write it.
            JavaValue::Bool(v) => self.write_primitive_block(&[u8::from(*v)]),
            JavaValue::Byte(v) => self.write_primitive_block(&[*v as u8]),
            JavaValue::Char(v) => self.write_primitive_block(&v.to_be_bytes()),
            JavaValue::Short(v) => self.write_primitive_block(&v.to_be_bytes()),
            JavaValue::Int(v) => self.write_primitive_block(&v.to_be_bytes()),
            JavaValue::Long(v) => self.write_primitive_block(&v.to_be_bytes()),
            JavaValue::Float(v) => self.write_primitive_block(&v.to_be_bytes()),
            JavaValue::Double(v) => self.write_primitive_block(&v.to_be_bytes()),
            JavaValue::Str(s) => {
                self.write_string(s);
                Ok(())
            }
            JavaValue::BlockData(data) => {
                self.write_block_data(data);
                Ok(())
            }
            JavaValue::ClassDesc(cd) => self.write_class_desc(cd),
            JavaValue::Class(class) => {
                if let Some(handle) = self.find_ref(value) {
                    self.write_reference(handle);
                    return Ok(());
                }
                self.writer.u8(TC_CLASS);
                self.write_class_desc(&class.class_desc)?;
                self.refs.push(value.clone());
                Ok(())
            }
            JavaValue::Enum(constant) => {
                if let Some(handle) = self.find_ref(value) {
                    self.write_reference(handle);
                    return Ok(());
                }
                self.writer.u8(TC_ENUM);
                self.write_class_desc(&constant.class_desc)?;
                self.refs.push(value.clone());
                self.write_string(&constant.constant);
                Ok(())
            }
            JavaValue::Array(array) => self.write_array(value, array),
            JavaValue::Object(instance) => self.write_instance(value, instance),
            JavaValue::Exception(_) => Err(self.unsupported("exception state")),
        }
    }

    // ---- references ------------------------------------------------------

    /// Identity lookup mirroring the decoder's handle numbering.
    fn find_ref(&self, value: &JavaValue) -> Option<u32> {
        self.refs
            .iter()
            .position(|seen| same_entity(seen, value))
            .map(|index| BASE_WIRE_HANDLE + index as u32)
    }

    fn write_reference(&mut self, handle: u32) {
        self.writer.u8(TC_REFERENCE);
        self.writer.u32(handle);
    }

    // ---- leaf writers ----------------------------------------------------

    fn write_primitive_block(&mut self, bytes: &[u8]) -> Result<(), StreamError> {
        self.write_block_data(bytes);
        Ok(())
    }

    fn write_block_data(&mut self, bytes: &[u8]) {
        if bytes.len() < 0x100 {
            self.writer.u8(TC_BLOCKDATA);
            self.writer.u8(bytes.len() as u8);
        } else {
            self.writer.u8(TC_BLOCKDATA_LONG);
            self.writer.u32(bytes.len() as u32);
        }
        self.writer.buf(bytes);
    }

    /// A string content value, with identity-based back-references.
    fn write_string(&mut self, s: &std::rc::Rc<str>) {
        let as_value = JavaValue::Str(s.clone());
        if let Some(handle) = self.find_ref(&as_value) {
            self.write_reference(handle);
            return;
        }
        let bytes = mutf8::encode(s);
        if bytes.len() > 0xFFFF {
            self.writer.u8(TC_LONGSTRING);
            self.writer.u64(bytes.len() as u64);
        } else {
            self.writer.u8(TC_STRING);
            self.writer.u16(bytes.len() as u16);
        }
        self.writer.buf(&bytes);
        self.refs.push(as_value);
    }

    /// A bare short-form UTF: class and field names, never referenced.
    fn write_utf_short(&mut self, text: &str) -> Result<(), StreamError> {
        let bytes = mutf8::encode(text);
        if bytes.len() > 0xFFFF {
            return Err(self.unsupported("name too long for short UTF"));
        }
        self.writer.u16(bytes.len() as u16);
        self.writer.buf(&bytes);
        Ok(())
    }

    // ---- descriptors -----------------------------------------------------

    fn write_class_desc(&mut self, cd: &ClassDesc) -> Result<(), StreamError> {
        let as_value = JavaValue::ClassDesc(cd.clone());
        if let Some(handle) = self.find_ref(&as_value) {
            self.write_reference(handle);
            return Ok(());
        }
        if cd.kind() == ClassDescKind::Proxy {
            return Err(self.unsupported("proxy class descriptor"));
        }

        self.writer.u8(TC_CLASSDESC);
        self.refs.push(as_value);
        self.write_utf_short(&cd.name())?;
        self.writer.i64(cd.serial_version_uid());
        self.writer.u8(cd.flags());

        let fields = cd.fields();
        if fields.len() > 0xFFFF {
            return Err(self.unsupported("too many fields"));
        }
        self.writer.u16(fields.len() as u16);
        for field in &fields {
            self.writer.u8(field.type_code.as_char() as u8);
            self.write_utf_short(&field.name)?;
            if !field.type_code.is_primitive() {
                let Some(signature) = &field.signature else {
                    return Err(
                        self.unsupported(format!("field {} lacks a type signature", field.name))
                    );
                };
                self.write_string(signature);
            }
        }

        for annotation in cd.annotations() {
            self.write_content(&annotation)?;
        }
        self.writer.u8(TC_ENDBLOCKDATA);

        match cd.super_class() {
            Some(super_class) => self.write_class_desc(&super_class),
            None => {
                self.writer.u8(TC_NULL);
                Ok(())
            }
        }
    }

    // ---- compounds -------------------------------------------------------

    fn write_array(
        &mut self,
        as_value: &JavaValue,
        array: &crate::content::JavaArray,
    ) -> Result<(), StreamError> {
        if let Some(handle) = self.find_ref(as_value) {
            self.write_reference(handle);
            return Ok(());
        }
        self.writer.u8(TC_ARRAY);
        self.write_class_desc(&array.class_desc())?;
        self.refs.push(as_value.clone());
        self.writer.i32(array.len() as i32);
        match array.data() {
            ArrayData::Bytes(bytes) => self.writer.buf(&bytes),
            ArrayData::Values(values) => {
                let element_type = array.element_type();
                for value in &values {
                    self.write_field_value(element_type, value)?;
                }
            }
        }
        Ok(())
    }

    fn write_instance(
        &mut self,
        as_value: &JavaValue,
        instance: &Instance,
    ) -> Result<(), StreamError> {
        if let Some(handle) = self.find_ref(as_value) {
            self.write_reference(handle);
            return Ok(());
        }
        match instance.repr() {
            Representation::Sequence(values) => self.write_sequence(as_value, &values),
            Representation::Mapping(pairs) => self.write_mapping(as_value, &pairs),
            Representation::Set(_) => Err(self.unsupported("set representation")),
            _ => self.write_record(as_value, instance),
        }
    }

    /// An ordered sequence in `java.util.ArrayList` form: a size field, then
    /// a capacity block and the elements as annotations.
    fn write_sequence(
        &mut self,
        as_value: &JavaValue,
        values: &[JavaValue],
    ) -> Result<(), StreamError> {
        let cd = self.array_list_desc();
        self.writer.u8(TC_OBJECT);
        self.write_class_desc(&cd)?;
        self.refs.push(as_value.clone());

        let size = values.len() as i32;
        self.writer.i32(size);
        self.writer.u8(TC_BLOCKDATA);
        self.writer.u8(4);
        self.writer.i32(size); // capacity
        for value in values {
            self.write_boxed_content(value)?;
        }
        self.writer.u8(TC_ENDBLOCKDATA);
        Ok(())
    }

    /// A mapping in `java.util.HashMap` form: loadFactor/threshold fields,
    /// then a capacity/size block and the pairs as annotations.
    fn write_mapping(
        &mut self,
        as_value: &JavaValue,
        pairs: &[(JavaValue, JavaValue)],
    ) -> Result<(), StreamError> {
        let cd = self.hash_map_desc();
        self.writer.u8(TC_OBJECT);
        self.write_class_desc(&cd)?;
        self.refs.push(as_value.clone());

        let capacity = (pairs.len().max(12).next_power_of_two() * 2) as i32;
        self.writer.f32(0.75);
        self.writer.i32(capacity * 3 / 4); // threshold
        self.writer.u8(TC_BLOCKDATA);
        self.writer.u8(8);
        self.writer.i32(capacity);
        self.writer.i32(pairs.len() as i32);
        for (key, value) in pairs {
            self.write_boxed_content(key)?;
            self.write_boxed_content(value)?;
        }
        self.writer.u8(TC_ENDBLOCKDATA);
        Ok(())
    }

    /// A collection element position requires an object: primitives are
    /// boxed as their `java.lang` wrapper instances, everything else is a
    /// regular content value.
    fn write_boxed_content(&mut self, value: &JavaValue) -> Result<(), StreamError> {
        match value {
            JavaValue::Bool(_)
            | JavaValue::Byte(_)
            | JavaValue::Char(_)
            | JavaValue::Short(_)
            | JavaValue::Int(_)
            | JavaValue::Long(_)
            | JavaValue::Float(_)
            | JavaValue::Double(_) => self.write_wrapper(value),
            other => self.write_content(other),
        }
    }

    fn write_wrapper(&mut self, value: &JavaValue) -> Result<(), StreamError> {
        let (cd, type_code) = self.wrapper_desc(value)?;
        self.writer.u8(TC_OBJECT);
        self.write_class_desc(&cd)?;
        // Each boxing gets its own handle; primitives never match the
        // identity lookup, so the slot is only there to keep numbering
        // aligned with the decoder.
        self.refs.push(value.clone());
        self.write_field_value(type_code, value)
    }

    /// A previously parsed generic record, written back verbatim through
    /// its preserved class descriptor chain.
    fn write_record(
        &mut self,
        as_value: &JavaValue,
        instance: &Instance,
    ) -> Result<(), StreamError> {
        let cd = instance.class_desc();
        self.writer.u8(TC_OBJECT);
        self.write_class_desc(&cd)?;
        self.refs.push(as_value.clone());

        let field_data = instance.field_data();
        let annotations = instance.annotations();
        for chain_cd in cd.hierarchy() {
            let layout = chain_cd.data_layout();
            match layout {
                ClassDataLayout::Fields | ClassDataLayout::FieldsThenAnnotations => {
                    let values = field_data
                        .iter()
                        .find(|(c, _)| c.ptr_eq(&chain_cd))
                        .map(|(_, v)| v.clone())
                        .unwrap_or_default();
                    for field in chain_cd.fields() {
                        let value = values
                            .iter()
                            .find(|(name, _)| name == &field.name)
                            .map(|(_, v)| v.clone())
                            .ok_or_else(|| {
                                self.unsupported(format!(
                                    "missing value for field {} of {}",
                                    field.name,
                                    chain_cd.name()
                                ))
                            })?;
                        self.write_field_value(field.type_code, &value)?;
                    }
                    if layout == ClassDataLayout::FieldsThenAnnotations {
                        let values = annotations
                            .iter()
                            .find(|(c, _)| c.ptr_eq(&chain_cd))
                            .map(|(_, v)| v.clone())
                            .unwrap_or_default();
                        for annotation in values {
                            self.write_content(&annotation)?;
                        }
                        self.writer.u8(TC_ENDBLOCKDATA);
                    }
                }
                ClassDataLayout::ExternalBlock | ClassDataLayout::ExternalLegacy => {
                    return Err(self.unsupported("externalizable instance"));
                }
                ClassDataLayout::Nothing => {}
            }
        }
        Ok(())
    }

    fn write_field_value(
        &mut self,
        type_code: TypeCode,
        value: &JavaValue,
    ) -> Result<(), StreamError> {
        match (type_code, value) {
            (TypeCode::Boolean, JavaValue::Bool(v)) => self.writer.u8(u8::from(*v)),
            (TypeCode::Byte, JavaValue::Byte(v)) => self.writer.i8(*v),
            (TypeCode::Char, JavaValue::Char(v)) => self.writer.u16(*v),
            (TypeCode::Short, JavaValue::Short(v)) => self.writer.i16(*v),
            (TypeCode::Int, JavaValue::Int(v)) => self.writer.i32(*v),
            (TypeCode::Long, JavaValue::Long(v)) => self.writer.i64(*v),
            (TypeCode::Float, JavaValue::Float(v)) => self.writer.f32(*v),
            (TypeCode::Double, JavaValue::Double(v)) => self.writer.f64(*v),
            (TypeCode::Object | TypeCode::Array, other) => return self.write_content(other),
            (expected, got) => {
                return Err(self.unsupported(format!(
                    "value of kind {} for a {:?} field",
                    got.kind_name(),
                    expected
                )))
            }
        }
        Ok(())
    }

    // ---- synthesized collection descriptors ------------------------------

    fn array_list_desc(&mut self) -> ClassDesc {
        if let Some(cd) = &self.sequence_desc {
            return cd.clone();
        }
        let cd = ClassDesc::new("java.util.ArrayList", ARRAY_LIST_UID);
        cd.set_flags(SC_SERIALIZABLE | SC_WRITE_METHOD);
        cd.push_field(JavaField {
            type_code: TypeCode::Int,
            name: "size".into(),
            signature: None,
        });
        self.sequence_desc = Some(cd.clone());
        cd
    }

    fn wrapper_desc(&mut self, value: &JavaValue) -> Result<(ClassDesc, TypeCode), StreamError> {
        let (name, uid, type_code, extends_number) = match value {
            JavaValue::Bool(_) => ("java.lang.Boolean", BOOLEAN_UID, TypeCode::Boolean, false),
            JavaValue::Byte(_) => ("java.lang.Byte", BYTE_UID, TypeCode::Byte, true),
            JavaValue::Char(_) => ("java.lang.Character", CHARACTER_UID, TypeCode::Char, false),
            JavaValue::Short(_) => ("java.lang.Short", SHORT_UID, TypeCode::Short, true),
            JavaValue::Int(_) => ("java.lang.Integer", INTEGER_UID, TypeCode::Int, true),
            JavaValue::Long(_) => ("java.lang.Long", LONG_UID, TypeCode::Long, true),
            JavaValue::Float(_) => ("java.lang.Float", FLOAT_UID, TypeCode::Float, true),
            JavaValue::Double(_) => ("java.lang.Double", DOUBLE_UID, TypeCode::Double, true),
            other => {
                return Err(self.unsupported(format!("cannot box {}", other.kind_name())))
            }
        };
        if let Some((_, cd)) = self.wrapper_descs.iter().find(|(n, _)| *n == name) {
            return Ok((cd.clone(), type_code));
        }
        let cd = ClassDesc::new(name, uid);
        cd.set_flags(SC_SERIALIZABLE);
        cd.push_field(JavaField {
            type_code,
            name: "value".into(),
            signature: None,
        });
        if extends_number {
            cd.set_super_class(Some(self.number_desc()));
        }
        self.wrapper_descs.push((name, cd.clone()));
        Ok((cd, type_code))
    }

    fn number_desc(&mut self) -> ClassDesc {
        if let Some(cd) = &self.number_desc {
            return cd.clone();
        }
        let cd = ClassDesc::new("java.lang.Number", NUMBER_UID);
        cd.set_flags(SC_SERIALIZABLE);
        self.number_desc = Some(cd.clone());
        cd
    }

    fn hash_map_desc(&mut self) -> ClassDesc {
        if let Some(cd) = &self.mapping_desc {
            return cd.clone();
        }
        let cd = ClassDesc::new("java.util.HashMap", HASH_MAP_UID);
        cd.set_flags(SC_SERIALIZABLE | SC_WRITE_METHOD);
        cd.push_field(JavaField {
            type_code: TypeCode::Float,
            name: "loadFactor".into(),
            signature: None,
        });
        cd.push_field(JavaField {
            type_code: TypeCode::Int,
            name: "threshold".into(),
            signature: None,
        });
        self.mapping_desc = Some(cd.clone());
        cd
    }
}

/// Identity comparison for the reference table.
fn same_entity(a: &JavaValue, b: &JavaValue) -> bool {
    use std::rc::Rc;
    match (a, b) {
        (JavaValue::Str(x), JavaValue::Str(y)) => Rc::ptr_eq(x, y),
        (JavaValue::ClassDesc(x), JavaValue::ClassDesc(y)) => x.ptr_eq(y),
        (JavaValue::Class(x), JavaValue::Class(y)) => Rc::ptr_eq(x, y),
        (JavaValue::Enum(x), JavaValue::Enum(y)) => Rc::ptr_eq(x, y),
        (JavaValue::Array(x), JavaValue::Array(y)) => x.ptr_eq(y),
        (JavaValue::Object(x), JavaValue::Object(y)) => x.ptr_eq(y),
        _ => false,
    }
}
