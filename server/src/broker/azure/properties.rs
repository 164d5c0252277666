use crate::broker::PropertyValue;
use chrono::DateTime;
use fe2o3_amqp_types::messaging::ApplicationProperties;
use fe2o3_amqp_types::primitives::{SimpleValue, Symbol, Timestamp, Uuid as AmqpUuid};
use std::collections::BTreeMap;
use uuid::Uuid;

pub(super) fn from_amqp_properties(
    properties: Option<&ApplicationProperties>,
) -> BTreeMap<String, PropertyValue> {
    properties
        .map(|props| {
            props
                .iter()
                .map(|(key, value)| (key.clone(), from_amqp_value(value)))
                .collect()
        })
        .unwrap_or_default()
}

pub(super) fn to_amqp_properties(
    properties: BTreeMap<String, PropertyValue>,
) -> Option<ApplicationProperties> {
    if properties.is_empty() {
        return None;
    }
    let mut amqp = ApplicationProperties::default();
    for (key, value) in properties {
        amqp.insert(key, to_amqp_value(value));
    }
    Some(amqp)
}

fn from_amqp_value(value: &SimpleValue) -> PropertyValue {
    match value {
        SimpleValue::Null => PropertyValue::Null,
        SimpleValue::Bool(v) => PropertyValue::Bool(*v),
        SimpleValue::Ubyte(v) => PropertyValue::UByte(*v),
        SimpleValue::Ushort(v) => PropertyValue::UShort(*v),
        SimpleValue::Uint(v) => PropertyValue::UInt(*v),
        SimpleValue::Ulong(v) => PropertyValue::ULong(*v),
        SimpleValue::Byte(v) => PropertyValue::Byte(*v),
        SimpleValue::Short(v) => PropertyValue::Short(*v),
        SimpleValue::Int(v) => PropertyValue::Int(*v),
        SimpleValue::Long(v) => PropertyValue::Long(*v),
        SimpleValue::Float(v) => PropertyValue::Float(v.into_inner()),
        SimpleValue::Double(v) => PropertyValue::Double(v.into_inner()),
        SimpleValue::Char(v) => PropertyValue::Char(*v),
        SimpleValue::Timestamp(v) => DateTime::from_timestamp_millis(v.milliseconds())
            .map(PropertyValue::Timestamp)
            .unwrap_or(PropertyValue::Long(v.milliseconds())),
        SimpleValue::Uuid(v) => PropertyValue::Uuid(Uuid::from_bytes(*v.as_inner())),
        SimpleValue::Binary(v) => PropertyValue::Binary(v.to_vec()),
        SimpleValue::String(v) => PropertyValue::String(v.clone()),
        SimpleValue::Symbol(v) => PropertyValue::Symbol(v.as_str().to_string()),
        other => {
            // decimals and described values have no typed counterpart
            log::debug!("Application property kept as text: {other:?}");
            PropertyValue::String(format!("{other:?}"))
        }
    }
}

fn to_amqp_value(value: PropertyValue) -> SimpleValue {
    match value {
        PropertyValue::Null => SimpleValue::Null,
        PropertyValue::Bool(v) => SimpleValue::Bool(v),
        PropertyValue::Byte(v) => SimpleValue::Byte(v),
        PropertyValue::Short(v) => SimpleValue::Short(v),
        PropertyValue::Int(v) => SimpleValue::Int(v),
        PropertyValue::Long(v) => SimpleValue::Long(v),
        PropertyValue::UByte(v) => SimpleValue::Ubyte(v),
        PropertyValue::UShort(v) => SimpleValue::Ushort(v),
        PropertyValue::UInt(v) => SimpleValue::Uint(v),
        PropertyValue::ULong(v) => SimpleValue::Ulong(v),
        PropertyValue::Float(v) => SimpleValue::from(v),
        PropertyValue::Double(v) => SimpleValue::from(v),
        PropertyValue::Char(v) => SimpleValue::Char(v),
        PropertyValue::String(v) => SimpleValue::String(v),
        PropertyValue::Symbol(v) => SimpleValue::Symbol(Symbol::from(v)),
        PropertyValue::Uuid(v) => SimpleValue::Uuid(AmqpUuid::from(v.into_bytes())),
        PropertyValue::Timestamp(v) => {
            SimpleValue::Timestamp(Timestamp::from_milliseconds(v.timestamp_millis()))
        }
        PropertyValue::Binary(v) => SimpleValue::Binary(v.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sample() -> BTreeMap<String, PropertyValue> {
        let stamp = DateTime::from_timestamp_millis(1_700_000_000_123).unwrap_or_else(Utc::now);
        BTreeMap::from([
            ("tenant".to_string(), PropertyValue::from("a")),
            ("attempt".to_string(), PropertyValue::Int(3)),
            ("total".to_string(), PropertyValue::Long(-9)),
            ("ratio".to_string(), PropertyValue::Double(0.5)),
            ("flag".to_string(), PropertyValue::Bool(false)),
            ("kind".to_string(), PropertyValue::Symbol("urgent".into())),
            (
                "trace".to_string(),
                PropertyValue::Uuid(Uuid::from_u128(0x6f1e_2d3c_4b5a_4978_8695_a4b3_c2d1_e0f1)),
            ),
            ("at".to_string(), PropertyValue::Timestamp(stamp)),
            ("blob".to_string(), PropertyValue::Binary(vec![0, 255])),
            ("empty".to_string(), PropertyValue::Null),
        ])
    }

    #[test]
    fn test_properties_keep_their_wire_types() {
        let amqp = to_amqp_properties(sample()).unwrap();
        assert_eq!(amqp.get("attempt"), Some(&SimpleValue::Int(3)));
        assert_eq!(amqp.get("tenant"), Some(&SimpleValue::String("a".into())));
        assert_eq!(amqp.get("kind"), Some(&SimpleValue::Symbol(Symbol::from("urgent"))));

        assert_eq!(from_amqp_properties(Some(&amqp)), sample());
    }

    #[test]
    fn test_empty_properties_are_omitted() {
        assert!(to_amqp_properties(BTreeMap::new()).is_none());
        assert!(from_amqp_properties(None).is_empty());
    }
}
