//! The parsed value model: everything a serialization stream can produce.
//!
//! Entities that receive wire handles (strings, class descriptors, class
//! values, enum constants, arrays, objects) are shared via `Rc`, so a
//! back-reference resolves to the *same* allocation as the original entity.
//! Entities that are populated incrementally while the stream is being read
//! (class descriptors, instances, arrays) additionally sit behind a
//! `RefCell`, which is what lets a cyclic graph reference an entity that is
//! still under construction.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::constants::{
    TypeCode, SC_BLOCK_DATA, SC_ENUM, SC_EXTERNALIZABLE, SC_SERIALIZABLE, SC_WRITE_METHOD,
};
use crate::transform::time::JavaTime;

/// A value decoded from (or encodable into) a serialization stream.
#[derive(Debug, Clone)]
pub enum JavaValue {
    Null,
    Bool(bool),
    Byte(i8),
    /// A UTF-16 code unit.
    Char(u16),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    /// `TC_STRING` / `TC_LONGSTRING`.
    Str(Rc<str>),
    /// A class descriptor appearing in content position.
    ClassDesc(ClassDesc),
    /// `TC_CLASS`: a class used as a value.
    Class(Rc<JavaClass>),
    /// `TC_ENUM`.
    Enum(Rc<JavaEnum>),
    /// `TC_ARRAY`.
    Array(JavaArray),
    /// `TC_OBJECT`.
    Object(Instance),
    /// `TC_BLOCKDATA` / `TC_BLOCKDATALONG`: an uninterpreted byte block.
    BlockData(Rc<[u8]>),
    /// A `TC_EXCEPTION` sub-stream, with the raw bytes it occupied.
    Exception(Rc<ExceptionState>),
}

impl JavaValue {
    /// The value kind, for diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            JavaValue::Null => "null",
            JavaValue::Bool(_) => "boolean",
            JavaValue::Byte(_) => "byte",
            JavaValue::Char(_) => "char",
            JavaValue::Short(_) => "short",
            JavaValue::Int(_) => "int",
            JavaValue::Long(_) => "long",
            JavaValue::Float(_) => "float",
            JavaValue::Double(_) => "double",
            JavaValue::Str(_) => "string",
            JavaValue::ClassDesc(_) => "class descriptor",
            JavaValue::Class(_) => "class",
            JavaValue::Enum(_) => "enum",
            JavaValue::Array(_) => "array",
            JavaValue::Object(_) => "object",
            JavaValue::BlockData(_) => "block data",
            JavaValue::Exception(_) => "exception state",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, JavaValue::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            JavaValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&Instance> {
        match self {
            JavaValue::Object(instance) => Some(instance),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&JavaArray> {
        match self {
            JavaValue::Array(array) => Some(array),
            _ => None,
        }
    }

    /// The payload of a block-data value.
    pub fn block_bytes(&self) -> Option<&[u8]> {
        match self {
            JavaValue::BlockData(data) => Some(data),
            _ => None,
        }
    }

    /// Renders the value for diagnostics. Nested handle-bearing entities are
    /// printed shallowly, so cyclic graphs render in finite space.
    pub fn dump(&self) -> String {
        match self {
            JavaValue::Str(s) => format!("[string {:?}]", s),
            JavaValue::ClassDesc(cd) => {
                format!("[classdesc 0x{:x}: {}]", cd.handle(), cd.name())
            }
            JavaValue::Class(class) => {
                format!("[class 0x{:x}: {}]", class.handle, class.class_desc.name())
            }
            JavaValue::Enum(value) => format!(
                "[enum 0x{:x}: {}.{}]",
                value.handle,
                value.class_desc.name(),
                value.constant
            ),
            JavaValue::Array(array) => {
                format!("[array 0x{:x}: {} items]", array.handle(), array.len())
            }
            JavaValue::Object(instance) => instance.dump(),
            JavaValue::BlockData(data) => format!("[blockdata: {} bytes]", data.len()),
            JavaValue::Exception(state) => {
                format!("[exception: {} bytes] {}", state.stream_data.len(), state.value.dump())
            }
            other => format!("{:?}", other),
        }
    }
}

impl PartialEq for JavaValue {
    fn eq(&self, other: &Self) -> bool {
        use JavaValue::*;
        match (self, other) {
            (Null, Null) => true,
            (Bool(a), Bool(b)) => a == b,
            (Byte(a), Byte(b)) => a == b,
            (Char(a), Char(b)) => a == b,
            (Short(a), Short(b)) => a == b,
            (Int(a), Int(b)) => a == b,
            (Long(a), Long(b)) => a == b,
            (Float(a), Float(b)) => a == b,
            (Double(a), Double(b)) => a == b,
            (Str(a), Str(b)) => a == b,
            (BlockData(a), BlockData(b)) => a == b,
            (ClassDesc(a), ClassDesc(b)) => a.ptr_eq(b),
            (Class(a), Class(b)) => {
                Rc::ptr_eq(a, b) || a.class_desc.ptr_eq(&b.class_desc)
            }
            (Enum(a), Enum(b)) => {
                Rc::ptr_eq(a, b)
                    || (a.constant == b.constant
                        && a.class_desc.name() == b.class_desc.name())
            }
            (Array(a), Array(b)) => a.ptr_eq(b) || a.data() == b.data(),
            // Instances compare by identity; use the representation
            // accessors for structural comparison.
            (Object(a), Object(b)) => a.ptr_eq(b),
            (Exception(a), Exception(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl JavaValue {
    /// Builds an instance carrying an ordered-sequence representation, the
    /// shape the writer emits as `java.util.ArrayList`.
    pub fn sequence(values: Vec<JavaValue>) -> JavaValue {
        let cd = ClassDesc::new("java.util.ArrayList", crate::constants::ARRAY_LIST_UID);
        cd.set_flags(SC_SERIALIZABLE | SC_WRITE_METHOD);
        let instance = Instance::new(cd);
        instance.set_repr(Representation::Sequence(values));
        JavaValue::Object(instance)
    }

    /// Builds an instance carrying a mapping representation, the shape the
    /// writer emits as `java.util.HashMap`.
    pub fn mapping(pairs: Vec<(JavaValue, JavaValue)>) -> JavaValue {
        let cd = ClassDesc::new("java.util.HashMap", crate::constants::HASH_MAP_UID);
        cd.set_flags(SC_SERIALIZABLE | SC_WRITE_METHOD);
        let instance = Instance::new(cd);
        instance.set_repr(Representation::Mapping(pairs));
        JavaValue::Object(instance)
    }
}

impl From<&str> for JavaValue {
    fn from(s: &str) -> Self {
        JavaValue::Str(Rc::from(s))
    }
}

/// A field declared by a class descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct JavaField {
    pub type_code: TypeCode,
    pub name: String,
    /// The Java-encoded type signature, present for object and array fields
    /// (`Ljava/lang/String;`, `[B`, ...).
    pub signature: Option<Rc<str>>,
}

/// Normal or dynamic-proxy class descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassDescKind {
    Normal,
    Proxy,
}

/// How the instance data of one class in a hierarchy is laid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassDataLayout {
    /// `SC_SERIALIZABLE` without `SC_WRITE_METHOD`: declared fields only.
    Fields,
    /// `SC_SERIALIZABLE` with `SC_WRITE_METHOD`: fields, then annotations up
    /// to `TC_ENDBLOCKDATA`.
    FieldsThenAnnotations,
    /// `SC_EXTERNALIZABLE` with `SC_BLOCK_DATA`: an opaque block payload a
    /// transformer must consume.
    ExternalBlock,
    /// `SC_EXTERNALIZABLE` without `SC_BLOCK_DATA`: protocol version 1
    /// external content.
    ExternalLegacy,
    /// Neither flag: the class contributes no instance data.
    Nothing,
}

#[derive(Debug)]
struct ClassDescInfo {
    kind: ClassDescKind,
    handle: u32,
    name: Rc<str>,
    serial_version_uid: i64,
    flags: u8,
    fields: Vec<JavaField>,
    annotations: Vec<JavaValue>,
    super_class: Option<ClassDesc>,
    interfaces: Vec<String>,
    enum_constants: Vec<Rc<str>>,
}

/// A parsed class description.
///
/// Cheap to clone; all clones share one descriptor. The descriptor is
/// registered in the handle table before its field list, annotations and
/// super-class are read, so descriptor records that reference themselves
/// resolve correctly.
#[derive(Clone)]
pub struct ClassDesc(Rc<RefCell<ClassDescInfo>>);

impl ClassDesc {
    /// Creates a normal class descriptor from its leading name and UID.
    pub fn new(name: &str, serial_version_uid: i64) -> Self {
        ClassDesc(Rc::new(RefCell::new(ClassDescInfo {
            kind: ClassDescKind::Normal,
            handle: 0,
            name: Rc::from(name),
            serial_version_uid,
            flags: 0,
            fields: Vec::new(),
            annotations: Vec::new(),
            super_class: None,
            interfaces: Vec::new(),
            enum_constants: Vec::new(),
        })))
    }

    /// Creates a dynamic proxy class descriptor.
    pub fn new_proxy() -> Self {
        let cd = ClassDesc::new("", 0);
        cd.0.borrow_mut().kind = ClassDescKind::Proxy;
        cd
    }

    pub fn ptr_eq(&self, other: &ClassDesc) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn kind(&self) -> ClassDescKind {
        self.0.borrow().kind
    }

    pub fn handle(&self) -> u32 {
        self.0.borrow().handle
    }

    pub fn set_handle(&self, handle: u32) {
        self.0.borrow_mut().handle = handle;
    }

    pub fn name(&self) -> Rc<str> {
        self.0.borrow().name.clone()
    }

    pub fn serial_version_uid(&self) -> i64 {
        self.0.borrow().serial_version_uid
    }

    pub fn flags(&self) -> u8 {
        self.0.borrow().flags
    }

    pub fn set_flags(&self, flags: u8) {
        self.0.borrow_mut().flags = flags;
    }

    pub fn has_flag(&self, flag: u8) -> bool {
        self.flags() & flag != 0
    }

    pub fn fields(&self) -> Vec<JavaField> {
        self.0.borrow().fields.clone()
    }

    pub fn push_field(&self, field: JavaField) {
        self.0.borrow_mut().fields.push(field);
    }

    pub fn field_count(&self) -> usize {
        self.0.borrow().fields.len()
    }

    pub fn annotations(&self) -> Vec<JavaValue> {
        self.0.borrow().annotations.clone()
    }

    pub fn set_annotations(&self, annotations: Vec<JavaValue>) {
        self.0.borrow_mut().annotations = annotations;
    }

    pub fn super_class(&self) -> Option<ClassDesc> {
        self.0.borrow().super_class.clone()
    }

    pub fn set_super_class(&self, super_class: Option<ClassDesc>) {
        self.0.borrow_mut().super_class = super_class;
    }

    pub fn interfaces(&self) -> Vec<String> {
        self.0.borrow().interfaces.clone()
    }

    pub fn set_interfaces(&self, interfaces: Vec<String>) {
        self.0.borrow_mut().interfaces = interfaces;
    }

    pub fn enum_constants(&self) -> Vec<Rc<str>> {
        self.0.borrow().enum_constants.clone()
    }

    pub fn push_enum_constant(&self, constant: Rc<str>) {
        let mut info = self.0.borrow_mut();
        if !info.enum_constants.contains(&constant) {
            info.enum_constants.push(constant);
        }
    }

    /// `true` when the descriptor names an array class (`[...`).
    pub fn is_array_class(&self) -> bool {
        self.name().starts_with('[')
    }

    /// The instance data layout implied by the descriptor flags.
    pub fn data_layout(&self) -> ClassDataLayout {
        let flags = self.flags();
        if flags & SC_EXTERNALIZABLE != 0 {
            if flags & SC_BLOCK_DATA != 0 {
                ClassDataLayout::ExternalBlock
            } else {
                ClassDataLayout::ExternalLegacy
            }
        } else if flags & SC_SERIALIZABLE != 0 {
            if flags & SC_WRITE_METHOD != 0 {
                ClassDataLayout::FieldsThenAnnotations
            } else {
                ClassDataLayout::Fields
            }
        } else {
            ClassDataLayout::Nothing
        }
    }

    /// Checks the flag combination for consistency.
    ///
    /// Returns a description of the violation, if any.
    pub fn check_flags(&self) -> Option<String> {
        let flags = self.flags();
        let serial_or_extern = SC_SERIALIZABLE | SC_EXTERNALIZABLE;
        if flags & serial_or_extern == serial_or_extern {
            return Some(format!(
                "class {} is both serializable and externalizable",
                self.name()
            ));
        }
        if flags & serial_or_extern == 0 && self.field_count() > 0 {
            return Some(format!(
                "non-serializable class {} declares fields",
                self.name()
            ));
        }
        if flags & SC_ENUM != 0 && (self.field_count() > 0 || !self.interfaces().is_empty()) {
            return Some(format!(
                "enum class {} declares fields or interfaces",
                self.name()
            ));
        }
        None
    }

    /// The class hierarchy in stream order: most ancestral first. This is
    /// the order in which instance field data appears in the stream.
    ///
    /// Proxy descriptors in the super chain contribute no field data and are
    /// skipped; a descriptor chain that loops back on itself is cut at the
    /// repeat.
    pub fn hierarchy(&self) -> Vec<ClassDesc> {
        let mut chain = Vec::new();
        let mut cursor = Some(self.clone());
        while let Some(cd) = cursor {
            if chain.iter().any(|seen: &ClassDesc| seen.ptr_eq(&cd)) {
                log::warn!("class descriptor chain loops at {}", cd.name());
                break;
            }
            if cd.kind() == ClassDescKind::Proxy && !cd.ptr_eq(self) {
                log::warn!("proxy class in super class hierarchy");
                break;
            }
            cursor = cd.super_class();
            chain.push(cd);
        }
        chain.reverse();
        chain
    }
}

impl fmt::Debug for ClassDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let info = self.0.borrow();
        f.debug_struct("ClassDesc")
            .field("name", &info.name)
            .field("uid", &info.serial_version_uid)
            .field("flags", &info.flags)
            .field("fields", &info.fields.len())
            .finish()
    }
}

/// `TC_CLASS`: a class value.
#[derive(Debug)]
pub struct JavaClass {
    pub handle: u32,
    pub class_desc: ClassDesc,
}

/// `TC_ENUM`: an enum constant.
#[derive(Debug)]
pub struct JavaEnum {
    pub handle: u32,
    pub class_desc: ClassDesc,
    pub constant: Rc<str>,
}

/// The element storage of an array: byte arrays stay an opaque byte
/// sequence, every other element kind is a list of values.
#[derive(Debug, Clone, PartialEq)]
pub enum ArrayData {
    Bytes(Vec<u8>),
    Values(Vec<JavaValue>),
}

#[derive(Debug)]
struct ArrayInfo {
    handle: u32,
    class_desc: ClassDesc,
    element_type: TypeCode,
    data: ArrayData,
}

/// A parsed array. Cheap to clone; clones share the allocation, which is
/// registered in the handle table before the elements are read so an object
/// array can contain a reference to itself.
#[derive(Clone)]
pub struct JavaArray(Rc<RefCell<ArrayInfo>>);

impl JavaArray {
    pub fn new(class_desc: ClassDesc, element_type: TypeCode) -> Self {
        let data = match element_type {
            TypeCode::Byte => ArrayData::Bytes(Vec::new()),
            _ => ArrayData::Values(Vec::new()),
        };
        JavaArray(Rc::new(RefCell::new(ArrayInfo {
            handle: 0,
            class_desc,
            element_type,
            data,
        })))
    }

    pub fn ptr_eq(&self, other: &JavaArray) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn handle(&self) -> u32 {
        self.0.borrow().handle
    }

    pub fn set_handle(&self, handle: u32) {
        self.0.borrow_mut().handle = handle;
    }

    pub fn class_desc(&self) -> ClassDesc {
        self.0.borrow().class_desc.clone()
    }

    pub fn element_type(&self) -> TypeCode {
        self.0.borrow().element_type
    }

    pub fn len(&self) -> usize {
        match &self.0.borrow().data {
            ArrayData::Bytes(bytes) => bytes.len(),
            ArrayData::Values(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn data(&self) -> ArrayData {
        self.0.borrow().data.clone()
    }

    /// The opaque byte payload of a `[B` array.
    pub fn bytes(&self) -> Option<Vec<u8>> {
        match &self.0.borrow().data {
            ArrayData::Bytes(bytes) => Some(bytes.clone()),
            ArrayData::Values(_) => None,
        }
    }

    /// The elements of a non-byte array.
    pub fn values(&self) -> Option<Vec<JavaValue>> {
        match &self.0.borrow().data {
            ArrayData::Values(values) => Some(values.clone()),
            ArrayData::Bytes(_) => None,
        }
    }

    pub fn set_bytes(&self, bytes: Vec<u8>) {
        self.0.borrow_mut().data = ArrayData::Bytes(bytes);
    }

    pub fn set_values(&self, values: Vec<JavaValue>) {
        self.0.borrow_mut().data = ArrayData::Values(values);
    }

    pub fn push(&self, value: JavaValue) {
        if let ArrayData::Values(values) = &mut self.0.borrow_mut().data {
            values.push(value);
        }
    }
}

impl fmt::Debug for JavaArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let info = self.0.borrow();
        write!(
            f,
            "JavaArray({}, len {})",
            info.class_desc.name(),
            match &info.data {
                ArrayData::Bytes(bytes) => bytes.len(),
                ArrayData::Values(values) => values.len(),
            }
        )
    }
}

/// The representation a transformer chose for an instance.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Representation {
    /// A generic named record: the per-ancestor field data is the value.
    #[default]
    Record,
    /// An ordered sequence (`ArrayList`, `LinkedList`, ...).
    Sequence(Vec<JavaValue>),
    /// A key/value mapping (`HashMap`, `TreeMap`, ...).
    Mapping(Vec<(JavaValue, JavaValue)>),
    /// An unordered collection (`HashSet`, `TreeSet`, ...).
    Set(Vec<JavaValue>),
    /// A single wrapped value (`java.lang.Integer` and friends).
    Value(JavaValue),
    /// A decoded `java.time` payload (opt-in transformer).
    Time(JavaTime),
}

#[derive(Debug)]
struct InstanceInfo {
    handle: u32,
    class_desc: ClassDesc,
    field_data: Vec<(ClassDesc, Vec<(String, JavaValue)>)>,
    annotations: Vec<(ClassDesc, Vec<JavaValue>)>,
    repr: Representation,
}

/// A parsed object instance.
///
/// Cheap to clone; clones share the allocation. The instance is created and
/// registered in the handle table *before* its field data is read, so a
/// field of the object can reference the object itself.
#[derive(Clone)]
pub struct Instance(Rc<RefCell<InstanceInfo>>);

impl Instance {
    pub fn new(class_desc: ClassDesc) -> Self {
        Instance(Rc::new(RefCell::new(InstanceInfo {
            handle: 0,
            class_desc,
            field_data: Vec::new(),
            annotations: Vec::new(),
            repr: Representation::Record,
        })))
    }

    /// Identity: do both handles refer to the same allocation?
    pub fn ptr_eq(&self, other: &Instance) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn handle(&self) -> u32 {
        self.0.borrow().handle
    }

    pub fn set_handle(&self, handle: u32) {
        self.0.borrow_mut().handle = handle;
    }

    pub fn class_desc(&self) -> ClassDesc {
        self.0.borrow().class_desc.clone()
    }

    /// Per-ancestor field data, most ancestral class first.
    pub fn field_data(&self) -> Vec<(ClassDesc, Vec<(String, JavaValue)>)> {
        self.0.borrow().field_data.clone()
    }

    pub fn push_field_data(&self, class_desc: ClassDesc, values: Vec<(String, JavaValue)>) {
        self.0.borrow_mut().field_data.push((class_desc, values));
    }

    /// Per-ancestor annotations, most ancestral class first.
    pub fn annotations(&self) -> Vec<(ClassDesc, Vec<JavaValue>)> {
        self.0.borrow().annotations.clone()
    }

    pub fn push_annotations(&self, class_desc: ClassDesc, values: Vec<JavaValue>) {
        self.0.borrow_mut().annotations.push((class_desc, values));
    }

    pub fn repr(&self) -> Representation {
        self.0.borrow().repr.clone()
    }

    pub fn set_repr(&self, repr: Representation) {
        self.0.borrow_mut().repr = repr;
    }

    /// Looks a field up by name across the hierarchy, most ancestral class
    /// first.
    pub fn field(&self, name: &str) -> Option<JavaValue> {
        let info = self.0.borrow();
        for (_, values) in &info.field_data {
            for (field_name, value) in values {
                if field_name == name {
                    return Some(value.clone());
                }
            }
        }
        None
    }

    /// The mapping pairs, when the representation is a mapping.
    pub fn mapping(&self) -> Option<Vec<(JavaValue, JavaValue)>> {
        match &self.0.borrow().repr {
            Representation::Mapping(pairs) => Some(pairs.clone()),
            _ => None,
        }
    }

    /// The elements, when the representation is an ordered sequence.
    pub fn sequence(&self) -> Option<Vec<JavaValue>> {
        match &self.0.borrow().repr {
            Representation::Sequence(values) => Some(values.clone()),
            _ => None,
        }
    }

    /// The elements, when the representation is a set.
    pub fn set_values(&self) -> Option<Vec<JavaValue>> {
        match &self.0.borrow().repr {
            Representation::Set(values) => Some(values.clone()),
            _ => None,
        }
    }

    /// The wrapped value, when the representation is a primitive wrapper.
    pub fn wrapped(&self) -> Option<JavaValue> {
        match &self.0.borrow().repr {
            Representation::Value(value) => Some(value.clone()),
            _ => None,
        }
    }

    /// Renders the instance and its field data for diagnostics.
    pub fn dump(&self) -> String {
        let info = self.0.borrow();
        let mut lines = vec![format!(
            "[instance 0x{:x}: {}",
            info.handle,
            info.class_desc.name()
        )];
        for (cd, values) in &info.field_data {
            lines.push(format!("\t{} -- {} fields", cd.name(), values.len()));
            for (name, value) in values {
                let rendered = match value {
                    JavaValue::Object(other) if other.ptr_eq(self) => "this".to_owned(),
                    other => other.dump(),
                };
                lines.push(format!("\t\t{}: {}", name, rendered));
            }
        }
        for (cd, values) in &info.annotations {
            lines.push(format!("\t{} -- {} annotations", cd.name(), values.len()));
        }
        lines.push("]".to_owned());
        lines.join("\n")
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let info = self.0.borrow();
        write!(
            f,
            "Instance(0x{:x}, {})",
            info.handle,
            info.class_desc.name()
        )
    }
}

/// A parsed exception sub-stream: the thrown object plus the raw bytes the
/// sub-stream occupied.
#[derive(Debug)]
pub struct ExceptionState {
    pub value: JavaValue,
    pub stream_data: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hierarchy_orders_ancestors_first() {
        let base = ClassDesc::new("Base", 1);
        base.set_flags(SC_SERIALIZABLE);
        let mid = ClassDesc::new("Mid", 2);
        mid.set_flags(SC_SERIALIZABLE);
        mid.set_super_class(Some(base.clone()));
        let leaf = ClassDesc::new("Leaf", 3);
        leaf.set_flags(SC_SERIALIZABLE);
        leaf.set_super_class(Some(mid.clone()));

        let chain = leaf.hierarchy();
        let names: Vec<_> = chain.iter().map(|cd| cd.name().to_string()).collect();
        assert_eq!(names, ["Base", "Mid", "Leaf"]);
    }

    #[test]
    fn hierarchy_cuts_descriptor_loops() {
        let a = ClassDesc::new("A", 1);
        a.set_super_class(Some(a.clone()));
        assert_eq!(a.hierarchy().len(), 1);
    }

    #[test]
    fn data_layout_from_flags() {
        let cd = ClassDesc::new("X", 0);
        cd.set_flags(SC_SERIALIZABLE);
        assert_eq!(cd.data_layout(), ClassDataLayout::Fields);
        cd.set_flags(SC_SERIALIZABLE | SC_WRITE_METHOD);
        assert_eq!(cd.data_layout(), ClassDataLayout::FieldsThenAnnotations);
        cd.set_flags(SC_EXTERNALIZABLE | SC_BLOCK_DATA);
        assert_eq!(cd.data_layout(), ClassDataLayout::ExternalBlock);
        cd.set_flags(SC_EXTERNALIZABLE);
        assert_eq!(cd.data_layout(), ClassDataLayout::ExternalLegacy);
        cd.set_flags(0);
        assert_eq!(cd.data_layout(), ClassDataLayout::Nothing);
    }

    #[test]
    fn check_flags_rejects_contradictions() {
        let cd = ClassDesc::new("X", 0);
        cd.set_flags(SC_SERIALIZABLE | SC_EXTERNALIZABLE);
        assert!(cd.check_flags().is_some());

        let cd = ClassDesc::new("Y", 0);
        cd.set_flags(0);
        cd.push_field(JavaField {
            type_code: TypeCode::Int,
            name: "x".into(),
            signature: None,
        });
        assert!(cd.check_flags().is_some());
    }

    #[test]
    fn instance_field_lookup_prefers_ancestors() {
        let base = ClassDesc::new("Base", 1);
        let leaf = ClassDesc::new("Leaf", 2);
        let instance = Instance::new(leaf.clone());
        instance.push_field_data(base, vec![("x".into(), JavaValue::Int(1))]);
        instance.push_field_data(leaf, vec![("x".into(), JavaValue::Int(2))]);
        assert_eq!(instance.field("x"), Some(JavaValue::Int(1)));
        assert_eq!(instance.field("missing"), None);
    }

    #[test]
    fn value_equality_is_structural_for_leaves_and_identity_for_objects() {
        assert_eq!(JavaValue::from("abc"), JavaValue::from("abc"));
        assert_ne!(JavaValue::Int(1), JavaValue::Long(1));

        let cd = ClassDesc::new("X", 0);
        let a = Instance::new(cd.clone());
        let b = Instance::new(cd);
        assert_eq!(JavaValue::Object(a.clone()), JavaValue::Object(a.clone()));
        assert_ne!(JavaValue::Object(a), JavaValue::Object(b));
    }

    #[test]
    fn self_referential_instance_dump_terminates() {
        let cd = ClassDesc::new("Selfish", 0);
        let instance = Instance::new(cd.clone());
        instance.push_field_data(
            cd,
            vec![("me".into(), JavaValue::Object(instance.clone()))],
        );
        let dump = instance.dump();
        assert!(dump.contains("this"));
    }
}
