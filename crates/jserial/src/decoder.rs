//! The stream decoder: a stateful, byte-level parser over the Java Object
//! Serialization Stream grammar.
//!
//! One decoder owns one stream. The magic/version preamble is consumed on
//! the first read; [`StreamDecoder::parse_one`] may then be called
//! repeatedly for streams that concatenate several top-level values, all
//! sharing one handle table.

use std::rc::Rc;

use jserial_buffers::Reader;
use log::{debug, trace};

use crate::constants::*;
use crate::content::{
    ClassDataLayout, ClassDesc, ExceptionState, Instance, JavaArray, JavaClass, JavaEnum,
    JavaField, JavaValue,
};
use crate::error::StreamError;
use crate::handles::HandleTable;
use crate::mutf8;
use crate::transform::Transformers;

/// Decoder over an in-memory serialization stream.
pub struct StreamDecoder<'a> {
    reader: Reader<'a>,
    handles: HandleTable,
    transformers: Transformers,
    header_read: bool,
}

impl<'a> StreamDecoder<'a> {
    /// Creates a decoder with the default transformer registry.
    pub fn new(data: &'a [u8]) -> Self {
        Self::with_transformers(data, Transformers::new())
    }

    /// Creates a decoder with a caller-supplied transformer registry.
    pub fn with_transformers(data: &'a [u8], transformers: Transformers) -> Self {
        Self {
            reader: Reader::new(data),
            handles: HandleTable::new(),
            transformers,
            header_read: false,
        }
    }

    /// Current byte offset in the stream.
    pub fn position(&self) -> usize {
        self.reader.pos()
    }

    /// The bytes remaining after what has been parsed so far.
    pub fn remaining(&self) -> &'a [u8] {
        self.reader.rest()
    }

    /// `true` once every byte of the source has been consumed.
    pub fn is_exhausted(&self) -> bool {
        self.reader.is_empty()
    }

    /// Parses the next top-level value.
    pub fn parse_one(&mut self) -> Result<JavaValue, StreamError> {
        self.ensure_header()?;
        loop {
            let offset = self.position();
            let tag = self.read_u8()?;
            if tag == TC_RESET {
                trace!("stream reset at {}", offset);
                self.reset_handles();
                continue;
            }
            debug!("reading content {} at {}", tag_name(tag), offset);
            return self.read_tagged_content(tag, offset, true, None);
        }
    }

    /// Parses top-level values until the byte source is exhausted.
    pub fn parse_all(&mut self) -> Result<Vec<JavaValue>, StreamError> {
        self.ensure_header()?;
        let mut contents = Vec::new();
        while !self.is_exhausted() {
            // A reset right at the end of the stream is not followed by
            // content; consume it and stop.
            if self.remaining().first() == Some(&TC_RESET) {
                self.read_u8()?;
                self.reset_handles();
                continue;
            }
            contents.push(self.parse_one()?);
        }
        Ok(contents)
    }

    /// Parses one content value (tag plus body). Public for transformers
    /// whose custom payloads embed regular content values.
    pub fn read_content(&mut self) -> Result<JavaValue, StreamError> {
        let offset = self.position();
        let tag = self.read_u8()?;
        self.read_tagged_content(tag, offset, true, None)
    }

    // ---- primitive reads -------------------------------------------------
    //
    // Thin checked wrappers over the buffer reader; a short read surfaces
    // as `Truncated` with the offset where the bytes ran out.

    pub fn read_bool(&mut self) -> Result<bool, StreamError> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_u8(&mut self) -> Result<u8, StreamError> {
        let offset = self.reader.pos();
        self.reader.u8().map_err(|_| StreamError::Truncated { offset })
    }

    pub fn read_i8(&mut self) -> Result<i8, StreamError> {
        let offset = self.reader.pos();
        self.reader.i8().map_err(|_| StreamError::Truncated { offset })
    }

    pub fn read_u16(&mut self) -> Result<u16, StreamError> {
        let offset = self.reader.pos();
        self.reader.u16().map_err(|_| StreamError::Truncated { offset })
    }

    pub fn read_i16(&mut self) -> Result<i16, StreamError> {
        let offset = self.reader.pos();
        self.reader.i16().map_err(|_| StreamError::Truncated { offset })
    }

    /// Reads a `char` field value: an unsigned UTF-16 code unit.
    pub fn read_char(&mut self) -> Result<u16, StreamError> {
        self.read_u16()
    }

    pub fn read_u32(&mut self) -> Result<u32, StreamError> {
        let offset = self.reader.pos();
        self.reader.u32().map_err(|_| StreamError::Truncated { offset })
    }

    pub fn read_i32(&mut self) -> Result<i32, StreamError> {
        let offset = self.reader.pos();
        self.reader.i32().map_err(|_| StreamError::Truncated { offset })
    }

    pub fn read_i64(&mut self) -> Result<i64, StreamError> {
        let offset = self.reader.pos();
        self.reader.i64().map_err(|_| StreamError::Truncated { offset })
    }

    pub fn read_f32(&mut self) -> Result<f32, StreamError> {
        let offset = self.reader.pos();
        self.reader.f32().map_err(|_| StreamError::Truncated { offset })
    }

    pub fn read_f64(&mut self) -> Result<f64, StreamError> {
        let offset = self.reader.pos();
        self.reader.f64().map_err(|_| StreamError::Truncated { offset })
    }

    pub fn read_bytes(&mut self, length: usize) -> Result<Vec<u8>, StreamError> {
        let offset = self.reader.pos();
        self.reader
            .buf(length)
            .map(<[u8]>::to_vec)
            .map_err(|_| StreamError::Truncated { offset })
    }

    /// Reads a short-form string: 16-bit byte length plus modified UTF-8.
    pub fn read_utf(&mut self) -> Result<String, StreamError> {
        let length = self.read_u16()? as usize;
        let offset = self.position();
        let bytes = self.read_bytes(length)?;
        mutf8::decode(&bytes)
            .map_err(|e| StreamError::malformed(offset, format!("modified UTF-8: {}", e)))
    }

    // ---- stream grammar --------------------------------------------------

    fn ensure_header(&mut self) -> Result<(), StreamError> {
        if self.header_read {
            return Ok(());
        }
        let offset = self.position();
        let magic = self.read_u16()?;
        if magic != STREAM_MAGIC {
            return Err(StreamError::malformed(
                offset,
                format!("invalid stream magic 0x{:04x}", magic),
            ));
        }
        let offset = self.position();
        let version = self.read_u16()?;
        if version != STREAM_VERSION {
            return Err(StreamError::malformed(
                offset,
                format!("unsupported stream version 0x{:04x}", version),
            ));
        }
        self.header_read = true;
        Ok(())
    }

    fn reset_handles(&mut self) {
        debug!("clearing {} handles", self.handles.len());
        self.handles.reset();
    }

    fn read_tagged_content(
        &mut self,
        tag: u8,
        offset: usize,
        allow_blockdata: bool,
        context: Option<&ClassDesc>,
    ) -> Result<JavaValue, StreamError> {
        trace!("content {} at {}", tag_name(tag), offset);
        match tag {
            TC_NULL => Ok(JavaValue::Null),
            TC_REFERENCE => self.read_reference(),
            TC_CLASSDESC | TC_PROXYCLASSDESC => {
                match self.read_class_desc_tagged(tag, offset)? {
                    Some(cd) => Ok(JavaValue::ClassDesc(cd)),
                    None => Ok(JavaValue::Null),
                }
            }
            TC_STRING | TC_LONGSTRING => {
                Ok(JavaValue::Str(self.read_new_string(tag, offset)?))
            }
            TC_ARRAY => self.read_array(offset),
            TC_CLASS => self.read_class_value(offset),
            TC_ENUM => self.read_enum(offset),
            TC_OBJECT => self.read_object(offset),
            TC_EXCEPTION => self.read_exception(offset),
            TC_RESET => {
                self.reset_handles();
                let offset = self.position();
                let tag = self.read_u8()?;
                self.read_tagged_content(tag, offset, allow_blockdata, context)
            }
            TC_BLOCKDATA | TC_BLOCKDATA_LONG => {
                if !allow_blockdata {
                    return Err(StreamError::malformed(offset, "block data not allowed here"));
                }
                self.read_block_data(tag)
            }
            TC_ENDBLOCKDATA => {
                Err(StreamError::malformed(offset, "unexpected end of block data"))
            }
            other => {
                // Raw bytes where a tag was expected: inside the custom
                // writeObject payload of a write-method class, a transformer
                // may know how to parse them.
                if let Some(cd) = context {
                    if cd.data_layout() == ClassDataLayout::FieldsThenAnnotations {
                        return self.read_custom_write_object(offset, &cd.name());
                    }
                }
                Err(StreamError::malformed(
                    offset,
                    format!("unknown content tag 0x{:02x}", other),
                ))
            }
        }
    }

    fn read_reference(&mut self) -> Result<JavaValue, StreamError> {
        let offset = self.position();
        let handle = self.read_u32()?;
        trace!("back-reference to 0x{:x}", handle);
        self.handles
            .get(handle)
            .ok_or(StreamError::UnknownHandle { offset, handle })
    }

    /// Reads a new string record, assigning its handle before the bytes so
    /// the numbering stays in stream order.
    fn read_new_string(&mut self, tag: u8, offset: usize) -> Result<Rc<str>, StreamError> {
        let handle = self.handles.reserve();
        let length = if tag == TC_STRING {
            self.read_u16()? as usize
        } else {
            let length = self.read_i64()?;
            if !(0..=i32::MAX as i64).contains(&length) {
                return Err(StreamError::malformed(
                    offset,
                    format!("invalid string length: {}", length),
                ));
            }
            if length < 0x1_0000 {
                log::warn!("small string stored in long form");
            }
            length as usize
        };
        let data_offset = self.position();
        let bytes = self.read_bytes(length)?;
        let text = mutf8::decode(&bytes)
            .map_err(|e| StreamError::malformed(data_offset, format!("modified UTF-8: {}", e)))?;
        let value: Rc<str> = Rc::from(text.as_str());
        self.handles.complete(handle, JavaValue::Str(value.clone()));
        Ok(value)
    }

    /// A string content position: a new string record or a back-reference
    /// to one.
    fn read_string_content(&mut self) -> Result<Rc<str>, StreamError> {
        let offset = self.position();
        let tag = self.read_u8()?;
        match tag {
            TC_STRING | TC_LONGSTRING => self.read_new_string(tag, offset),
            TC_REFERENCE => match self.read_reference()? {
                JavaValue::Str(s) => Ok(s),
                other => Err(StreamError::malformed(
                    offset,
                    format!("reference to {} where a string was expected", other.kind_name()),
                )),
            },
            other => Err(StreamError::malformed(
                offset,
                format!("expected a string, got {}", tag_name(other)),
            )),
        }
    }

    fn read_class_desc(&mut self) -> Result<Option<ClassDesc>, StreamError> {
        let offset = self.position();
        let tag = self.read_u8()?;
        self.read_class_desc_tagged(tag, offset)
    }

    fn read_class_desc_tagged(
        &mut self,
        tag: u8,
        offset: usize,
    ) -> Result<Option<ClassDesc>, StreamError> {
        match tag {
            TC_NULL => Ok(None),
            TC_REFERENCE => match self.read_reference()? {
                JavaValue::ClassDesc(cd) => Ok(Some(cd)),
                other => Err(StreamError::malformed(
                    offset,
                    format!(
                        "referenced entity is not a class descriptor ({})",
                        other.kind_name()
                    ),
                )),
            },
            TC_CLASSDESC => {
                let name = self.read_utf()?;
                let uid = self.read_i64()?;
                let cd = ClassDesc::new(&name, uid);
                // Registered before fields and super-class, so the
                // descriptor can reference itself.
                let handle = self.handles.assign(JavaValue::ClassDesc(cd.clone()));
                cd.set_handle(handle);
                debug!("class descriptor {} (handle 0x{:x})", name, handle);

                cd.set_flags(self.read_u8()?);
                let field_count = self.read_u16()?;
                for _ in 0..field_count {
                    let field_offset = self.position();
                    let type_byte = self.read_u8()?;
                    let Some(type_code) = TypeCode::from_u8(type_byte) else {
                        return Err(StreamError::malformed(
                            field_offset,
                            format!("invalid field type 0x{:02x}", type_byte),
                        ));
                    };
                    let field_name = self.read_utf()?;
                    let signature = if type_code.is_primitive() {
                        None
                    } else {
                        Some(self.read_string_content()?)
                    };
                    cd.push_field(JavaField {
                        type_code,
                        name: field_name,
                        signature,
                    });
                }

                let annotations = self.read_annotations(Some(&cd))?;
                cd.set_annotations(annotations);
                cd.set_super_class(self.read_class_desc()?);
                Ok(Some(cd))
            }
            TC_PROXYCLASSDESC => {
                let cd = ClassDesc::new_proxy();
                let handle = self.handles.assign(JavaValue::ClassDesc(cd.clone()));
                cd.set_handle(handle);

                let count = self.read_i32()?;
                if count < 0 {
                    return Err(StreamError::malformed(offset, "negative interface count"));
                }
                let mut interfaces = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    interfaces.push(self.read_utf()?);
                }
                cd.set_interfaces(interfaces);

                let annotations = self.read_annotations(None)?;
                cd.set_annotations(annotations);
                cd.set_super_class(self.read_class_desc()?);
                Ok(Some(cd))
            }
            other => Err(StreamError::malformed(
                offset,
                format!("expected a class description, got {}", tag_name(other)),
            )),
        }
    }

    /// Content values up to `TC_ENDBLOCKDATA`.
    fn read_annotations(
        &mut self,
        context: Option<&ClassDesc>,
    ) -> Result<Vec<JavaValue>, StreamError> {
        let mut contents = Vec::new();
        loop {
            let offset = self.position();
            let tag = self.read_u8()?;
            match tag {
                TC_ENDBLOCKDATA => return Ok(contents),
                TC_RESET => self.reset_handles(),
                _ => contents.push(self.read_tagged_content(tag, offset, true, context)?),
            }
        }
    }

    fn read_block_data(&mut self, tag: u8) -> Result<JavaValue, StreamError> {
        let size = if tag == TC_BLOCKDATA {
            self.read_u8()? as usize
        } else {
            let offset = self.position();
            let size = self.read_i32()?;
            if size < 0 {
                return Err(StreamError::malformed(offset, "negative block data size"));
            }
            size as usize
        };
        let bytes = self.read_bytes(size)?;
        Ok(JavaValue::BlockData(Rc::from(bytes)))
    }

    fn read_enum(&mut self, offset: usize) -> Result<JavaValue, StreamError> {
        let cd = self
            .read_class_desc()?
            .ok_or_else(|| StreamError::malformed(offset, "enum with null class descriptor"))?;
        // The enum's handle precedes the handle of its constant-name string.
        let handle = self.handles.reserve();
        let constant = self.read_string_content()?;
        cd.push_enum_constant(constant.clone());
        let value = Rc::new(JavaEnum {
            handle,
            class_desc: cd,
            constant,
        });
        self.handles.complete(handle, JavaValue::Enum(value.clone()));
        Ok(JavaValue::Enum(value))
    }

    fn read_class_value(&mut self, offset: usize) -> Result<JavaValue, StreamError> {
        let cd = self
            .read_class_desc()?
            .ok_or_else(|| StreamError::malformed(offset, "class value with null descriptor"))?;
        let handle = self.handles.reserve();
        let value = Rc::new(JavaClass {
            handle,
            class_desc: cd,
        });
        self.handles.complete(handle, JavaValue::Class(value.clone()));
        Ok(JavaValue::Class(value))
    }

    fn read_array(&mut self, offset: usize) -> Result<JavaValue, StreamError> {
        let cd = self
            .read_class_desc()?
            .ok_or_else(|| StreamError::malformed(offset, "array with null class descriptor"))?;
        let name = cd.name();
        if !name.starts_with('[') || name.len() < 2 {
            return Err(StreamError::malformed(
                offset,
                format!("invalid array class name {:?}", name),
            ));
        }
        let element_byte = name.as_bytes()[1];
        let element_type = TypeCode::from_u8(element_byte).ok_or_else(|| {
            StreamError::malformed(
                offset,
                format!("invalid array element type 0x{:02x}", element_byte),
            )
        })?;

        // Registered before the elements, so an object array can contain a
        // reference to itself.
        let array = JavaArray::new(cd, element_type);
        let handle = self.handles.reserve();
        array.set_handle(handle);
        self.handles.complete(handle, JavaValue::Array(array.clone()));

        let length = self.read_i32()?;
        if length < 0 {
            return Err(StreamError::malformed(offset, "negative array length"));
        }
        let length = length as usize;
        debug!("array of {} x {:?} (handle 0x{:x})", length, element_type, handle);

        let mut loaded = false;
        for transformer in self.transformers.chain() {
            if let Some(values) = transformer.load_array(self, element_type, length)? {
                array.set_values(values);
                loaded = true;
                break;
            }
        }
        if !loaded {
            if element_type == TypeCode::Byte {
                // Byte arrays stay one opaque byte sequence.
                array.set_bytes(self.read_bytes(length)?);
            } else {
                for _ in 0..length {
                    let value = self.read_field_value(element_type)?;
                    array.push(value);
                }
            }
        }
        Ok(JavaValue::Array(array))
    }

    fn read_object(&mut self, offset: usize) -> Result<JavaValue, StreamError> {
        let cd = self
            .read_class_desc()?
            .ok_or_else(|| StreamError::malformed(offset, "object with null class descriptor"))?;
        let instance = self.transformers.create(&cd);
        // Registered before the field data is read, so a field can
        // reference the object itself.
        let handle = self.handles.reserve();
        instance.set_handle(handle);
        self.handles
            .complete(handle, JavaValue::Object(instance.clone()));
        debug!("new object: handle 0x{:x}, class {}", handle, cd.name());

        self.read_class_data(&instance)?;
        debug!("done reading object handle 0x{:x}", handle);
        Ok(JavaValue::Object(instance))
    }

    /// Reads the instance data of the whole super chain, most ancestral
    /// class first, then lets a transformer finalize the representation.
    fn read_class_data(&mut self, instance: &Instance) -> Result<(), StreamError> {
        for cd in instance.class_desc().hierarchy() {
            if let Some(violation) = cd.check_flags() {
                return Err(StreamError::unsupported(self.position(), violation));
            }
            match cd.data_layout() {
                ClassDataLayout::Fields => {
                    let values = self.read_fields(&cd)?;
                    instance.push_field_data(cd.clone(), values);
                }
                ClassDataLayout::FieldsThenAnnotations => {
                    let values = self.read_fields(&cd)?;
                    instance.push_field_data(cd.clone(), values);
                    let annotations = self.read_annotations(Some(&cd))?;
                    instance.push_annotations(cd.clone(), annotations);
                }
                ClassDataLayout::ExternalBlock => {
                    let mut handled = false;
                    for transformer in self.transformers.chain() {
                        if transformer.load_from_blockdata(instance, self)? {
                            handled = true;
                            break;
                        }
                    }
                    if !handled {
                        return Err(StreamError::TransformerFailed {
                            offset: self.position(),
                            class_name: cd.name().to_string(),
                        });
                    }
                    let annotations = self.read_annotations(None)?;
                    instance.push_annotations(cd.clone(), annotations);
                }
                ClassDataLayout::ExternalLegacy => {
                    let name = cd.name();
                    let mut parsed = None;
                    for transformer in self.transformers.chain() {
                        if let Some(desc) = transformer.load_custom_write_object(self, &name)? {
                            parsed = Some(desc);
                            break;
                        }
                    }
                    match parsed {
                        Some(desc) => instance
                            .push_annotations(cd.clone(), vec![JavaValue::ClassDesc(desc)]),
                        None => {
                            return Err(StreamError::unsupported(
                                self.position(),
                                format!("protocol version 1 external content for class {}", name),
                            ))
                        }
                    }
                }
                ClassDataLayout::Nothing => {}
            }
        }

        for transformer in self.transformers.chain() {
            if transformer.load_from_instance(instance, self)? {
                break;
            }
        }
        Ok(())
    }

    fn read_fields(&mut self, cd: &ClassDesc) -> Result<Vec<(String, JavaValue)>, StreamError> {
        let mut values = Vec::with_capacity(cd.field_count());
        for field in cd.fields() {
            trace!("field {} ({:?})", field.name, field.type_code);
            let value = self.read_field_value(field.type_code)?;
            values.push((field.name, value));
        }
        Ok(values)
    }

    /// One field-typed value: a primitive, or a full content value for
    /// object and array fields.
    fn read_field_value(&mut self, type_code: TypeCode) -> Result<JavaValue, StreamError> {
        match type_code {
            TypeCode::Boolean => Ok(JavaValue::Bool(self.read_bool()?)),
            TypeCode::Byte => Ok(JavaValue::Byte(self.read_i8()?)),
            TypeCode::Char => Ok(JavaValue::Char(self.read_char()?)),
            TypeCode::Short => Ok(JavaValue::Short(self.read_i16()?)),
            TypeCode::Int => Ok(JavaValue::Int(self.read_i32()?)),
            TypeCode::Long => Ok(JavaValue::Long(self.read_i64()?)),
            TypeCode::Float => Ok(JavaValue::Float(self.read_f32()?)),
            TypeCode::Double => Ok(JavaValue::Double(self.read_f64()?)),
            TypeCode::Object | TypeCode::Array => {
                let offset = self.position();
                let tag = self.read_u8()?;
                self.read_tagged_content(tag, offset, false, None)
            }
        }
    }

    /// An exception sub-stream: reset, the thrown object, reset again. The
    /// raw bytes of the sub-stream, from its leading `TC_EXCEPTION` tag on,
    /// are captured alongside the object.
    fn read_exception(&mut self, offset: usize) -> Result<JavaValue, StreamError> {
        self.reset_handles();
        let tag_offset = self.position();
        let tag = self.read_u8()?;
        if tag == TC_RESET {
            return Err(StreamError::malformed(
                tag_offset,
                "reset inside exception sub-stream",
            ));
        }
        let content = self.read_tagged_content(tag, tag_offset, false, None)?;
        if !matches!(content, JavaValue::Object(_)) {
            return Err(StreamError::malformed(
                tag_offset,
                format!("exception object is not an instance ({})", content.kind_name()),
            ));
        }
        let end = self.position();
        let stream_data = self.reader.span(offset, end).to_vec();
        self.reset_handles();
        Ok(JavaValue::Exception(Rc::new(ExceptionState {
            value: content,
            stream_data,
        })))
    }

    /// Rewinds to the first raw byte and asks the transformers to parse a
    /// custom `writeObject` payload.
    fn read_custom_write_object(
        &mut self,
        offset: usize,
        class_name: &str,
    ) -> Result<JavaValue, StreamError> {
        for transformer in self.transformers.chain() {
            self.reader
                .seek(offset)
                .map_err(|_| StreamError::Truncated { offset })?;
            if let Some(desc) = transformer.load_custom_write_object(self, class_name)? {
                return Ok(JavaValue::ClassDesc(desc));
            }
        }
        Err(StreamError::unsupported(
            offset,
            format!("custom writeObject data for class {}", class_name),
        ))
    }
}
