//! Opt-in transformer for `java.time` serialized forms.
//!
//! All `java.time` values serialize through the `java.time.Ser` proxy, an
//! externalizable class whose block payload starts with a one-byte kind tag.
//! By default such values stay generic records; add [`JavaTimeTransformer`]
//! to the registry to decode the payload into a [`JavaTime`].

use jserial_buffers::Reader;

use crate::content::{Instance, JavaValue, Representation};
use crate::decoder::StreamDecoder;
use crate::error::StreamError;
use crate::mutf8;
use crate::transform::types::ObjectTransformer;

const SER_CLASS: &str = "java.time.Ser";

// Kind tags of the java.time.Ser payload.
const DURATION: i8 = 1;
const INSTANT: i8 = 2;
const LOCAL_DATE: i8 = 3;
const LOCAL_TIME: i8 = 4;
const LOCAL_DATE_TIME: i8 = 5;
const ZONED_DATE_TIME: i8 = 6;
const ZONE_REGION: i8 = 7;
const ZONE_OFFSET: i8 = 8;
const OFFSET_TIME: i8 = 9;
const OFFSET_DATE_TIME: i8 = 10;
const YEAR: i8 = 11;
const YEAR_MONTH: i8 = 12;
const MONTH_DAY: i8 = 13;
const PERIOD: i8 = 14;

/// The kind of `java.time` value a payload encodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeKind {
    Duration,
    Instant,
    LocalDate,
    LocalTime,
    LocalDateTime,
    ZonedDateTime,
    ZoneRegion,
    ZoneOffset,
    OffsetTime,
    OffsetDateTime,
    Year,
    YearMonth,
    MonthDay,
    Period,
}

/// A decoded `java.time` payload. Which fields are set depends on the kind;
/// seconds are the epoch/duration seconds for `Duration` and `Instant` and
/// the time-of-day seconds otherwise.
#[derive(Debug, Clone, PartialEq)]
pub struct JavaTime {
    pub kind: TimeKind,
    pub year: Option<i32>,
    pub month: Option<i32>,
    pub day: Option<i32>,
    pub hour: Option<i8>,
    pub minute: Option<i8>,
    pub second: Option<i64>,
    pub nano: Option<i32>,
    /// Zone offset east of UTC, in seconds.
    pub offset_seconds: Option<i32>,
    pub zone: Option<String>,
}

impl JavaTime {
    fn new(kind: TimeKind) -> Self {
        JavaTime {
            kind,
            year: None,
            month: None,
            day: None,
            hour: None,
            minute: None,
            second: None,
            nano: None,
            offset_seconds: None,
            zone: None,
        }
    }
}

/// Decodes `java.time.Ser` block payloads. Opt-in: construct a registry with
/// this transformer ahead of the default one.
pub struct JavaTimeTransformer;

impl ObjectTransformer for JavaTimeTransformer {
    fn create_instance(&self, class_desc: &crate::content::ClassDesc) -> Option<Instance> {
        if &*class_desc.name() == SER_CLASS {
            Some(Instance::new(class_desc.clone()))
        } else {
            None
        }
    }

    fn load_from_blockdata(
        &self,
        instance: &Instance,
        _decoder: &mut StreamDecoder<'_>,
    ) -> Result<bool, StreamError> {
        // The payload arrives as a block-data annotation right after this
        // hook; accepting here lets the annotation loop collect it.
        Ok(&*instance.class_desc().name() == SER_CLASS)
    }

    fn load_from_instance(
        &self,
        instance: &Instance,
        decoder: &mut StreamDecoder<'_>,
    ) -> Result<bool, StreamError> {
        for (cd, annotations) in instance.annotations() {
            if &*cd.name() != SER_CLASS {
                continue;
            }
            let Some(JavaValue::BlockData(payload)) = annotations.first() else {
                return Err(StreamError::TransformerFailed {
                    offset: decoder.position(),
                    class_name: SER_CLASS.to_string(),
                });
            };
            return match parse_payload(payload) {
                Some(time) => {
                    instance.set_repr(Representation::Time(time));
                    Ok(true)
                }
                None => {
                    log::warn!("unhandled java.time payload, keeping the generic record");
                    Ok(false)
                }
            };
        }
        Ok(false)
    }
}

fn parse_payload(payload: &[u8]) -> Option<JavaTime> {
    let mut reader = Reader::new(payload);
    let kind = reader.i8().ok()?;
    let mut time = JavaTime::new(match kind {
        DURATION => TimeKind::Duration,
        INSTANT => TimeKind::Instant,
        LOCAL_DATE => TimeKind::LocalDate,
        LOCAL_TIME => TimeKind::LocalTime,
        LOCAL_DATE_TIME => TimeKind::LocalDateTime,
        ZONED_DATE_TIME => TimeKind::ZonedDateTime,
        ZONE_REGION => TimeKind::ZoneRegion,
        ZONE_OFFSET => TimeKind::ZoneOffset,
        OFFSET_TIME => TimeKind::OffsetTime,
        OFFSET_DATE_TIME => TimeKind::OffsetDateTime,
        YEAR => TimeKind::Year,
        YEAR_MONTH => TimeKind::YearMonth,
        MONTH_DAY => TimeKind::MonthDay,
        PERIOD => TimeKind::Period,
        _ => return None,
    });

    match time.kind {
        TimeKind::Duration | TimeKind::Instant => {
            time.second = Some(reader.i64().ok()?);
            time.nano = Some(reader.i32().ok()?);
        }
        TimeKind::LocalDate => read_local_date(&mut reader, &mut time)?,
        TimeKind::LocalTime => read_local_time(&mut reader, &mut time)?,
        TimeKind::LocalDateTime => {
            read_local_date(&mut reader, &mut time)?;
            read_local_time(&mut reader, &mut time)?;
        }
        TimeKind::ZonedDateTime => {
            read_local_date(&mut reader, &mut time)?;
            read_local_time(&mut reader, &mut time)?;
            read_zone_offset(&mut reader, &mut time)?;
            read_zone_region(&mut reader, &mut time)?;
        }
        TimeKind::ZoneRegion => read_zone_region(&mut reader, &mut time)?,
        TimeKind::ZoneOffset => read_zone_offset(&mut reader, &mut time)?,
        TimeKind::OffsetTime => {
            read_local_time(&mut reader, &mut time)?;
            read_zone_offset(&mut reader, &mut time)?;
        }
        TimeKind::OffsetDateTime => {
            read_local_date(&mut reader, &mut time)?;
            read_local_time(&mut reader, &mut time)?;
            read_zone_offset(&mut reader, &mut time)?;
        }
        TimeKind::Year => time.year = Some(reader.i32().ok()?),
        TimeKind::YearMonth => {
            time.year = Some(reader.i32().ok()?);
            time.month = Some(reader.i8().ok()? as i32);
        }
        TimeKind::MonthDay => {
            time.month = Some(reader.i8().ok()? as i32);
            time.day = Some(reader.i8().ok()? as i32);
        }
        TimeKind::Period => {
            time.year = Some(reader.i32().ok()?);
            time.month = Some(reader.i32().ok()?);
            time.day = Some(reader.i32().ok()?);
        }
    }
    Some(time)
}

fn read_local_date(reader: &mut Reader<'_>, time: &mut JavaTime) -> Option<()> {
    time.year = Some(reader.i32().ok()?);
    time.month = Some(reader.i8().ok()? as i32);
    time.day = Some(reader.i8().ok()? as i32);
    Some(())
}

/// `LocalTime` truncates its encoding: a negative value means the remaining
/// components are zero, with the ones-complement of the last real component.
fn read_local_time(reader: &mut Reader<'_>, time: &mut JavaTime) -> Option<()> {
    let mut minute = 0i8;
    let mut second = 0i64;
    let mut nano = 0i32;

    let mut hour = reader.i8().ok()?;
    if hour < 0 {
        hour = !hour;
    } else {
        minute = reader.i8().ok()?;
        if minute < 0 {
            minute = !minute;
        } else {
            let s = reader.i8().ok()?;
            if s < 0 {
                second = !s as i64;
            } else {
                second = s as i64;
                nano = reader.i32().ok()?;
            }
        }
    }

    time.hour = Some(hour);
    time.minute = Some(minute);
    time.second = Some(second);
    time.nano = Some(nano);
    Some(())
}

fn read_zone_offset(reader: &mut Reader<'_>, time: &mut JavaTime) -> Option<()> {
    let offset_byte = reader.i8().ok()?;
    time.offset_seconds = Some(if offset_byte == 127 {
        reader.i32().ok()?
    } else {
        offset_byte as i32 * 900
    });
    Some(())
}

fn read_zone_region(reader: &mut Reader<'_>, time: &mut JavaTime) -> Option<()> {
    let length = reader.u16().ok()? as usize;
    let bytes = reader.buf(length).ok()?;
    time.zone = Some(mutf8::decode(bytes).ok()?);
    Some(())
}
