//! End-to-end decoder matrix over hand-built wire fixtures.

use std::rc::Rc;

use jserial::{
    mutf8, parse_one, ClassDesc, Instance, JavaValue, ObjectTransformer, ParseOptions,
    Representation, StreamDecoder, StreamError, Transformers,
};
use jserial_buffers::Writer;

const TC_NULL: u8 = 0x70;
const TC_REFERENCE: u8 = 0x71;
const TC_CLASSDESC: u8 = 0x72;
const TC_OBJECT: u8 = 0x73;
const TC_STRING: u8 = 0x74;
const TC_ARRAY: u8 = 0x75;
const TC_CLASS: u8 = 0x76;
const TC_BLOCKDATA: u8 = 0x77;
const TC_ENDBLOCKDATA: u8 = 0x78;
const TC_EXCEPTION: u8 = 0x7B;
const TC_PROXYCLASSDESC: u8 = 0x7D;
const TC_ENUM: u8 = 0x7E;

const SC_WRITE_METHOD: u8 = 0x01;
const SC_SERIALIZABLE: u8 = 0x02;
const SC_EXTERNALIZABLE: u8 = 0x04;
const SC_BLOCK_DATA: u8 = 0x08;
const SC_ENUM: u8 = 0x10;

const BASE: u32 = 0x7E_0000;

fn header() -> Writer {
    let mut w = Writer::new();
    w.u16(0xACED);
    w.u16(0x0005);
    w
}

fn utf(w: &mut Writer, s: &str) {
    let bytes = mutf8::encode(s);
    w.u16(bytes.len() as u16);
    w.buf(&bytes);
}

fn string(w: &mut Writer, s: &str) {
    w.u8(TC_STRING);
    utf(w, s);
}

/// A class descriptor with a null super class. Fields are
/// `(type tag, name, optional signature)`.
fn class_desc(w: &mut Writer, name: &str, uid: i64, flags: u8, fields: &[(u8, &str, Option<&str>)]) {
    class_desc_open(w, name, uid, flags, fields);
    w.u8(TC_NULL);
}

/// Same, but leaves the super-class position for the caller.
fn class_desc_open(
    w: &mut Writer,
    name: &str,
    uid: i64,
    flags: u8,
    fields: &[(u8, &str, Option<&str>)],
) {
    w.u8(TC_CLASSDESC);
    utf(w, name);
    w.i64(uid);
    w.u8(flags);
    w.u16(fields.len() as u16);
    for (tag, field_name, signature) in fields {
        w.u8(*tag);
        utf(w, field_name);
        if let Some(signature) = signature {
            string(w, signature);
        }
    }
    w.u8(TC_ENDBLOCKDATA);
}

fn decode(w: Writer) -> JavaValue {
    let mut w = w;
    parse_one(&w.flush(), Vec::new(), ParseOptions::default()).unwrap()
}

#[test]
fn byte_array_field_stays_an_opaque_byte_sequence() {
    let mut w = header();
    w.u8(TC_OBJECT);
    class_desc(
        &mut w,
        "ClassWithByteArray",
        0x1234_5678,
        SC_SERIALIZABLE,
        &[(b'[', "myArray", Some("[B"))],
    );
    // field value: the array itself
    w.u8(TC_ARRAY);
    class_desc(&mut w, "[B", -0x531A_2C99_F6E2_2E20, SC_SERIALIZABLE, &[]);
    w.i32(4);
    w.buf(&[0x01, 0x03, 0x07, 0x0B]);

    let value = decode(w);
    let instance = value.as_object().unwrap();
    let array_value = instance.field("myArray").unwrap();
    let array = array_value.as_array().unwrap();
    assert_eq!(array.bytes(), Some(vec![0x01, 0x03, 0x07, 0x0B]));
    // Not a list of four integers.
    assert_eq!(array.values(), None);
}

#[test]
fn empty_byte_array_decodes_to_empty_bytes() {
    let mut w = header();
    w.u8(TC_ARRAY);
    class_desc(&mut w, "[B", 1, SC_SERIALIZABLE, &[]);
    w.i32(0);

    let value = decode(w);
    assert_eq!(value.as_array().unwrap().bytes(), Some(Vec::new()));
}

#[test]
fn int_array_decodes_elementwise() {
    let mut w = header();
    w.u8(TC_ARRAY);
    class_desc(&mut w, "[I", 2, SC_SERIALIZABLE, &[]);
    w.i32(3);
    w.i32(-1);
    w.i32(0);
    w.i32(65536);

    let value = decode(w);
    let values = value.as_array().unwrap().values().unwrap();
    assert_eq!(
        values,
        vec![JavaValue::Int(-1), JavaValue::Int(0), JavaValue::Int(65536)]
    );
}

#[test]
fn two_dimensional_array_nests() {
    let mut w = header();
    w.u8(TC_ARRAY);
    class_desc(&mut w, "[[I", 3, SC_SERIALIZABLE, &[]);
    w.i32(2);
    // each element is itself a full content value
    w.u8(TC_ARRAY);
    class_desc(&mut w, "[I", 4, SC_SERIALIZABLE, &[]);
    w.i32(1);
    w.i32(7);
    w.u8(TC_ARRAY);
    w.u8(TC_REFERENCE);
    w.u32(BASE + 2); // the [I descriptor read for the first element
    w.i32(1);
    w.i32(8);

    let value = decode(w);
    let outer = value.as_array().unwrap().values().unwrap();
    assert_eq!(outer.len(), 2);
    let first = outer[0].as_array().unwrap().values().unwrap();
    assert_eq!(first, vec![JavaValue::Int(7)]);
}

#[test]
fn inherited_fields_read_super_chain_first() {
    let mut w = header();
    w.u8(TC_OBJECT);
    class_desc_open(
        &mut w,
        "TestConcrete",
        11,
        SC_SERIALIZABLE,
        &[(b'L', "childString", Some("Ljava/lang/String;"))],
    );
    // super class
    class_desc(
        &mut w,
        "SuperAaaa",
        10,
        SC_SERIALIZABLE,
        &[(b'L', "superString", Some("Ljava/lang/String;"))],
    );
    // instance data: super fields first
    string(&mut w, "Super!!");
    string(&mut w, "Child!!");

    let value = decode(w);
    let instance = value.as_object().unwrap();
    assert_eq!(
        instance.field("superString").unwrap().as_str(),
        Some("Super!!")
    );
    assert_eq!(
        instance.field("childString").unwrap().as_str(),
        Some("Child!!")
    );
    let order: Vec<String> = instance
        .field_data()
        .iter()
        .map(|(cd, _)| cd.name().to_string())
        .collect();
    assert_eq!(order, ["SuperAaaa", "TestConcrete"]);
}

#[test]
fn self_referential_object_resolves_to_itself() {
    let mut w = header();
    w.u8(TC_OBJECT);
    class_desc(
        &mut w,
        "Selfish",
        21,
        SC_SERIALIZABLE,
        &[(b'L', "me", Some("LSelfish;"))],
    );
    // handles: classdesc = BASE, signature string = BASE+1, object = BASE+2
    w.u8(TC_REFERENCE);
    w.u32(BASE + 2);

    let value = decode(w);
    let instance = value.as_object().unwrap();
    let me = instance.field("me").unwrap();
    assert!(me.as_object().unwrap().ptr_eq(instance));
}

#[test]
fn two_fields_sharing_one_instance_keep_identity() {
    let mut w = header();
    w.u8(TC_OBJECT);
    class_desc(
        &mut w,
        "A1",
        31,
        SC_SERIALIZABLE,
        &[(b'L', "b1", Some("LB1;")), (b'L', "b2", Some("LB1;"))],
    );
    // handles so far: A1 desc = BASE, the two signature strings = BASE+1
    // and BASE+2, the outer object = BASE+3.
    // b1: a fresh inner object (B1 desc = BASE+4, instance = BASE+5)
    w.u8(TC_OBJECT);
    class_desc(&mut w, "B1", 32, SC_SERIALIZABLE, &[]);
    // b2: a back-reference to the same instance
    w.u8(TC_REFERENCE);
    w.u32(BASE + 5);

    let value = decode(w);
    let instance = value.as_object().unwrap();
    let b1 = instance.field("b1").unwrap();
    let b2 = instance.field("b2").unwrap();
    assert!(b1.as_object().unwrap().ptr_eq(b2.as_object().unwrap()));
}

#[test]
fn enum_constant_and_its_back_reference() {
    let mut w = header();
    w.u8(TC_ENUM);
    class_desc_open(&mut w, "com.example.Suit", 0, SC_SERIALIZABLE | SC_ENUM, &[]);
    class_desc(&mut w, "java.lang.Enum", 0, SC_SERIALIZABLE | SC_ENUM, &[]);
    string(&mut w, "SPADES");
    // handles: Suit = BASE, Enum = BASE+1, enum value = BASE+2, name = BASE+3
    w.u8(TC_REFERENCE);
    w.u32(BASE + 2);

    let mut w = w;
    let data = w.flush();
    let mut decoder = StreamDecoder::new(&data);
    let first = decoder.parse_one().unwrap();
    let second = decoder.parse_one().unwrap();

    let JavaValue::Enum(constant) = &first else {
        panic!("expected an enum, got {:?}", first)
    };
    assert_eq!(&*constant.constant, "SPADES");
    assert_eq!(&*constant.class_desc.name(), "com.example.Suit");
    assert_eq!(first, second);
}

#[test]
fn class_value_gets_its_own_handle() {
    let mut w = header();
    w.u8(TC_CLASS);
    class_desc(&mut w, "com.example.Widget", 5, SC_SERIALIZABLE, &[]);
    // handles: classdesc = BASE, class value = BASE+1
    w.u8(TC_REFERENCE);
    w.u32(BASE + 1);

    let mut w = w;
    let data = w.flush();
    let mut decoder = StreamDecoder::new(&data);
    let first = decoder.parse_one().unwrap();
    let second = decoder.parse_one().unwrap();
    assert!(matches!(first, JavaValue::Class(_)));
    assert_eq!(first, second);
}

#[test]
fn proxy_class_descriptor_carries_interfaces() {
    let mut w = header();
    w.u8(TC_OBJECT);
    w.u8(TC_PROXYCLASSDESC);
    w.u32(2);
    utf(&mut w, "com.example.Api");
    utf(&mut w, "java.io.Serializable");
    w.u8(TC_ENDBLOCKDATA);
    // proxy super class: a normal serializable class with no fields
    class_desc(&mut w, "java.lang.reflect.Proxy", 6, SC_SERIALIZABLE, &[]);

    let value = decode(w);
    let instance = value.as_object().unwrap();
    let cd = instance.class_desc();
    assert_eq!(
        cd.interfaces(),
        vec!["com.example.Api".to_string(), "java.io.Serializable".to_string()]
    );
}

#[test]
fn string_at_the_short_form_boundary() {
    let body = "x".repeat(0xFFFF);
    let mut w = header();
    string(&mut w, &body);
    let value = decode(w);
    assert_eq!(value.as_str(), Some(body.as_str()));
}

#[test]
fn long_form_string() {
    let body = "y".repeat(0x1_0000);
    let mut w = header();
    w.u8(0x7C); // TC_LONGSTRING
    let bytes = mutf8::encode(&body);
    w.u64(bytes.len() as u64);
    w.buf(&bytes);
    let value = decode(w);
    assert_eq!(value.as_str().map(str::len), Some(0x1_0000));
}

#[test]
fn supplementary_code_points_decode() {
    let mut w = header();
    w.u8(TC_STRING);
    w.u16(6);
    w.buf(&[0xED, 0xA0, 0xBD, 0xED, 0xB8, 0x80]);
    let value = decode(w);
    assert_eq!(value.as_str(), Some("\u{1F600}"));
}

#[test]
fn write_method_annotations_are_collected_per_class() {
    let mut w = header();
    w.u8(TC_OBJECT);
    class_desc(
        &mut w,
        "com.example.Logged",
        41,
        SC_SERIALIZABLE | SC_WRITE_METHOD,
        &[(b'I', "count", None)],
    );
    w.i32(3);
    // annotations written by writeObject
    w.u8(TC_BLOCKDATA);
    w.u8(2);
    w.buf(&[0xCA, 0xFE]);
    string(&mut w, "extra");
    w.u8(TC_ENDBLOCKDATA);

    let value = decode(w);
    let instance = value.as_object().unwrap();
    assert_eq!(instance.field("count"), Some(JavaValue::Int(3)));
    let annotations = instance.annotations();
    assert_eq!(annotations.len(), 1);
    let (_, values) = &annotations[0];
    assert_eq!(values.len(), 2);
    assert_eq!(values[0].block_bytes(), Some(&[0xCA, 0xFE][..]));
    assert_eq!(values[1].as_str(), Some("extra"));
}

#[test]
fn hash_set_fixture_becomes_a_set() {
    let mut w = header();
    w.u8(TC_OBJECT);
    class_desc(
        &mut w,
        "java.util.HashSet",
        -5024744406713321676,
        SC_SERIALIZABLE | SC_WRITE_METHOD,
        &[],
    );
    // capacity, load factor, size in one coalesced block
    w.u8(TC_BLOCKDATA);
    w.u8(12);
    w.i32(16);
    w.f32(0.75);
    w.i32(2);
    string(&mut w, "a");
    string(&mut w, "b");
    w.u8(TC_ENDBLOCKDATA);

    let value = decode(w);
    let values = value.as_object().unwrap().set_values().unwrap();
    assert_eq!(values, vec![JavaValue::from("a"), JavaValue::from("b")]);
}

#[test]
fn hashtable_fixture_becomes_a_mapping() {
    let mut w = header();
    w.u8(TC_OBJECT);
    class_desc(
        &mut w,
        "java.util.Hashtable",
        1421746759512286392,
        SC_SERIALIZABLE | SC_WRITE_METHOD,
        &[(b'F', "loadFactor", None), (b'I', "threshold", None)],
    );
    w.f32(0.75);
    w.i32(8);
    w.u8(TC_BLOCKDATA);
    w.u8(8);
    w.i32(11);
    w.i32(1);
    string(&mut w, "key");
    string(&mut w, "value");
    w.u8(TC_ENDBLOCKDATA);

    let value = decode(w);
    let pairs = value.as_object().unwrap().mapping().unwrap();
    assert_eq!(
        pairs,
        vec![(JavaValue::from("key"), JavaValue::from("value"))]
    );
}

#[test]
fn externalizable_block_without_transformer_fails() {
    let mut w = header();
    w.u8(TC_OBJECT);
    class_desc(
        &mut w,
        "com.example.Ext",
        51,
        SC_EXTERNALIZABLE | SC_BLOCK_DATA,
        &[],
    );
    w.u8(TC_BLOCKDATA);
    w.u8(1);
    w.u8(0x00);
    w.u8(TC_ENDBLOCKDATA);

    let mut w = w;
    let data = w.flush();
    let result = parse_one(&data, Vec::new(), ParseOptions::default());
    assert!(matches!(
        result,
        Err(StreamError::TransformerFailed { class_name, .. }) if class_name == "com.example.Ext"
    ));
}

#[test]
fn exception_sub_stream_resets_handles_and_captures_bytes() {
    let mut w = header();
    w.u8(TC_EXCEPTION);
    w.u8(TC_OBJECT);
    class_desc(&mut w, "java.io.IOException", 61, SC_SERIALIZABLE, &[]);
    // After the exception both resets have run: the next string takes the
    // base handle again.
    string(&mut w, "after");
    w.u8(TC_REFERENCE);
    w.u32(BASE);

    let mut w = w;
    let data = w.flush();
    let mut decoder = StreamDecoder::new(&data);

    let first = decoder.parse_one().unwrap();
    let JavaValue::Exception(state) = &first else {
        panic!("expected an exception state, got {:?}", first)
    };
    let thrown = state.value.as_object().unwrap();
    assert_eq!(&*thrown.class_desc().name(), "java.io.IOException");
    // The capture covers the whole sub-stream, leading tag included.
    assert_eq!(state.stream_data[0], TC_EXCEPTION);
    assert_eq!(state.stream_data[1], TC_OBJECT);

    assert_eq!(decoder.parse_one().unwrap().as_str(), Some("after"));
    assert_eq!(decoder.parse_one().unwrap().as_str(), Some("after"));
}

#[test]
fn handle_assignment_is_deterministic_across_runs() {
    let mut w = header();
    w.u8(TC_OBJECT);
    class_desc(
        &mut w,
        "com.example.Pair",
        71,
        SC_SERIALIZABLE,
        &[(b'L', "left", Some("Ljava/lang/String;")), (b'L', "right", Some("Ljava/lang/String;"))],
    );
    string(&mut w, "l");
    string(&mut w, "r");
    let mut w = w;
    let data = w.flush();

    let run = |data: &[u8]| -> Vec<u32> {
        let mut decoder = StreamDecoder::new(data);
        let value = decoder.parse_one().unwrap();
        let instance = value.as_object().unwrap();
        vec![instance.class_desc().handle(), instance.handle()]
    };
    assert_eq!(run(&data), run(&data));
}

#[test]
fn custom_write_object_hook_parses_raw_payload() {
    // A transformer that claims com.example.Raw and decodes its custom
    // writeObject bytes: one i32 plus one content value.
    struct RawTransformer;

    impl ObjectTransformer for RawTransformer {
        fn create_instance(&self, class_desc: &ClassDesc) -> Option<Instance> {
            (&*class_desc.name() == "com.example.Raw").then(|| Instance::new(class_desc.clone()))
        }

        fn load_custom_write_object(
            &self,
            decoder: &mut StreamDecoder<'_>,
            class_name: &str,
        ) -> Result<Option<ClassDesc>, StreamError> {
            if class_name != "com.example.Raw" {
                return Ok(None);
            }
            let magic = decoder.read_i32()?;
            let label = decoder.read_content()?;
            let parsed = ClassDesc::new("com.example.Raw$Payload", i64::from(magic));
            parsed.set_annotations(vec![label]);
            Ok(Some(parsed))
        }
    }

    let mut w = header();
    w.u8(TC_OBJECT);
    class_desc(
        &mut w,
        "com.example.Raw",
        81,
        SC_SERIALIZABLE | SC_WRITE_METHOD,
        &[],
    );
    // custom writeObject payload: raw bytes, not content tags
    w.i32(0x0BAD_CAFE);
    string(&mut w, "tail");
    w.u8(TC_ENDBLOCKDATA);

    let mut w = w;
    let data = w.flush();
    let value = parse_one(&data, vec![Rc::new(RawTransformer)], ParseOptions::default()).unwrap();
    let instance = value.as_object().unwrap();
    let annotations = instance.annotations();
    let (_, values) = &annotations[0];
    let JavaValue::ClassDesc(parsed) = &values[0] else {
        panic!("expected the transformer-parsed payload")
    };
    assert_eq!(parsed.serial_version_uid(), 0x0BAD_CAFE);
    assert_eq!(parsed.annotations()[0].as_str(), Some("tail"));
}

#[test]
fn claimed_write_method_class_still_reads_declared_fields() {
    // A transformer claiming an ordinary write-method class: the declared
    // fields (defaultWriteObject) are decoded as fields, and only the data
    // writeObject appended after them lands in the annotations.
    struct Claiming;

    impl ObjectTransformer for Claiming {
        fn create_instance(&self, class_desc: &ClassDesc) -> Option<Instance> {
            (&*class_desc.name() == "com.example.Tagged")
                .then(|| Instance::new(class_desc.clone()))
        }

        fn load_from_instance(
            &self,
            instance: &Instance,
            _decoder: &mut StreamDecoder<'_>,
        ) -> Result<bool, StreamError> {
            if &*instance.class_desc().name() != "com.example.Tagged" {
                return Ok(false);
            }
            let values = instance
                .annotations()
                .into_iter()
                .flat_map(|(_, values)| values)
                .collect();
            instance.set_repr(Representation::Sequence(values));
            Ok(true)
        }
    }

    let mut w = header();
    w.u8(TC_OBJECT);
    class_desc(
        &mut w,
        "com.example.Tagged",
        101,
        SC_SERIALIZABLE | SC_WRITE_METHOD,
        &[(b'I', "count", None), (b'L', "label", Some("Ljava/lang/String;"))],
    );
    // defaultWriteObject: the declared fields come first...
    w.i32(7);
    string(&mut w, "name");
    // ...then what writeObject appended, up to the end marker
    string(&mut w, "extra");
    w.u8(TC_ENDBLOCKDATA);

    let mut w = w;
    let data = w.flush();
    let value = parse_one(&data, vec![Rc::new(Claiming)], ParseOptions::default()).unwrap();
    let instance = value.as_object().unwrap();
    assert_eq!(instance.field("count"), Some(JavaValue::Int(7)));
    assert_eq!(instance.field("label").unwrap().as_str(), Some("name"));
    assert_eq!(instance.sequence(), Some(vec![JavaValue::from("extra")]));
}

#[test]
fn java_time_transformer_decodes_ser_payload() {
    use jserial::JavaTimeTransformer;

    let mut w = header();
    w.u8(TC_OBJECT);
    class_desc(
        &mut w,
        "java.time.Ser",
        -8885321777449118786,
        SC_EXTERNALIZABLE | SC_BLOCK_DATA,
        &[],
    );
    // payload: LOCAL_DATE (3), year 2024, month 2, day 29
    w.u8(TC_BLOCKDATA);
    w.u8(7);
    w.u8(3);
    w.i32(2024);
    w.u8(2);
    w.u8(29);
    w.u8(TC_ENDBLOCKDATA);

    let mut w = w;
    let data = w.flush();

    // Without the transformer the block has no owner.
    assert!(matches!(
        parse_one(&data, Vec::new(), ParseOptions::default()),
        Err(StreamError::TransformerFailed { .. })
    ));

    let value = parse_one(
        &data,
        vec![Rc::new(JavaTimeTransformer)],
        ParseOptions::default(),
    )
    .unwrap();
    let instance = value.as_object().unwrap();
    let Representation::Time(time) = instance.repr() else {
        panic!("expected a time representation, got {:?}", instance.repr())
    };
    assert_eq!((time.year, time.month, time.day), (Some(2024), Some(2), Some(29)));
}

#[test]
fn array_load_hook_takes_over_element_reading() {
    struct IntArrayHook;

    impl ObjectTransformer for IntArrayHook {
        fn load_array(
            &self,
            decoder: &mut StreamDecoder<'_>,
            element_type: jserial::TypeCode,
            length: usize,
        ) -> Result<Option<Vec<JavaValue>>, StreamError> {
            if element_type != jserial::TypeCode::Int {
                return Ok(None);
            }
            let mut values = Vec::with_capacity(length);
            for _ in 0..length {
                values.push(JavaValue::Int(decoder.read_i32()?));
            }
            Ok(Some(values))
        }
    }

    let mut w = header();
    w.u8(TC_ARRAY);
    class_desc(&mut w, "[I", 2, SC_SERIALIZABLE, &[]);
    w.i32(2);
    w.i32(100);
    w.i32(200);

    let mut w = w;
    let data = w.flush();
    let value = parse_one(&data, vec![Rc::new(IntArrayHook)], ParseOptions::default()).unwrap();
    assert_eq!(
        value.as_array().unwrap().values().unwrap(),
        vec![JavaValue::Int(100), JavaValue::Int(200)]
    );
}

#[test]
fn shared_class_descriptor_via_reference() {
    let mut w = header();
    w.u8(TC_OBJECT);
    class_desc(&mut w, "com.example.Node", 91, SC_SERIALIZABLE, &[(b'L', "next", Some("Lcom.example.Node;"))]);
    // next: a second Node whose descriptor is a back-reference
    w.u8(TC_OBJECT);
    w.u8(TC_REFERENCE);
    w.u32(BASE); // the Node class descriptor
    w.u8(TC_NULL); // its next

    let value = decode(w);
    let outer = value.as_object().unwrap();
    let inner_value = outer.field("next").unwrap();
    let inner = inner_value.as_object().unwrap();
    assert!(outer.class_desc().ptr_eq(&inner.class_desc()));
    assert!(inner.field("next").unwrap().is_null());
}

#[test]
fn decoder_with_explicit_registry_matches_front_door() {
    let mut w = header();
    string(&mut w, "same");
    let mut w = w;
    let data = w.flush();

    let mut decoder = StreamDecoder::with_transformers(&data, Transformers::new());
    assert_eq!(decoder.parse_one().unwrap().as_str(), Some("same"));
}
