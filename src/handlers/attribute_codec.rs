use thiserror::Error;
use tracing::trace;

use crate::hw::{AttributeDescriptor, AttributeMap, AttributeModel, AttributeValue, DataType};

/// Errors returned when translating between payloads and attribute maps.
#[derive(Debug, Error, Clone, Eq, PartialEq)]
pub enum AttributeCodecError {
    /// The payload ends before an attribute's last byte.
    #[error(
        "attribute `{attribute}` of product `{product_key}` needs {required} payload bytes, got {actual}"
    )]
    PayloadTooShort {
        product_key: String,
        attribute: String,
        required: usize,
        actual: usize,
    },
    /// A value does not match the attribute's declared data type.
    #[error("attribute `{attribute}` expects a {expected} value, got {actual}")]
    ValueTypeMismatch {
        attribute: String,
        expected: DataType,
        actual: DataType,
    },
    /// A value does not fit in the attribute's bit field.
    #[error("value {value} does not fit in the {bits}-bit field of `{attribute}`")]
    ValueOutOfRange {
        attribute: String,
        value: u32,
        bits: usize,
    },
}

/// Schema-driven status payload codec.
pub struct AttributeCodec;

impl AttributeCodec {
    /// Decodes every attribute of `model` out of `payload`.
    ///
    /// The whole decode fails if any attribute lies beyond the payload.
    ///
    /// # Errors
    ///
    /// Returns [`AttributeCodecError::PayloadTooShort`] when the payload is
    /// shorter than an attribute requires.
    ///
    /// ```
    /// use jebao::{
    ///     AttributeCodec, AttributeDescriptor, AttributeModel, AttributeValue, BitPosition,
    ///     DataType,
    /// };
    ///
    /// let model = AttributeModel::new(
    ///     "pk",
    ///     vec![
    ///         AttributeDescriptor::new("power", DataType::Bool, BitPosition::bits(0, 0, 1)),
    ///         AttributeDescriptor::new("mode", DataType::Enum, BitPosition::bits(0, 1, 7))
    ///             .with_enum_values(["auto", "manual"]),
    ///     ],
    /// )?;
    /// let attributes = AttributeCodec::decode(&model, &[0x03])?;
    /// assert_eq!(Some(&AttributeValue::Bool(true)), attributes.get("power"));
    /// assert_eq!(Some(&AttributeValue::Enum(1)), attributes.get("mode"));
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn decode(model: &AttributeModel, payload: &[u8]) -> Result<AttributeMap, AttributeCodecError> {
        for attribute in &model.attrs {
            let required = attribute.required_payload_len();
            if payload.len() < required {
                return Err(AttributeCodecError::PayloadTooShort {
                    product_key: model.product_key.clone(),
                    attribute: attribute.name.clone(),
                    required,
                    actual: payload.len(),
                });
            }
        }

        let payload = if model.swaps_leading_bytes() {
            trace!(product_key = %model.product_key, "swapping leading payload bytes");
            Self::swap_endian(payload)
        } else {
            payload.to_vec()
        };

        Ok(model
            .attrs
            .iter()
            .map(|attribute| (attribute.name.clone(), decode_attribute(attribute, &payload)))
            .collect())
    }

    /// Packs `attributes` into a status payload laid out by `model`.
    ///
    /// Attributes missing from the map are left as zero bits.
    ///
    /// # Errors
    ///
    /// Returns an error when a value has the wrong data type or does not fit
    /// its field.
    pub fn encode(
        model: &AttributeModel,
        attributes: &AttributeMap,
    ) -> Result<Vec<u8>, AttributeCodecError> {
        let mut payload = vec![0u8; model.payload_len()];
        for attribute in &model.attrs {
            if let Some(value) = attributes.get(&attribute.name) {
                encode_attribute(attribute, value, &mut payload)?;
            }
        }
        if model.swaps_leading_bytes() {
            payload = Self::swap_endian(&payload);
        }
        Ok(payload)
    }

    /// Extracts `length` bits starting at `bit_offset` of `payload[byte_offset]`.
    ///
    /// Bits are numbered low-to-high and continue into following bytes.
    /// Returns `None` when the field extends past the payload or is wider
    /// than 32 bits.
    ///
    /// ```
    /// use jebao::AttributeCodec;
    ///
    /// assert_eq!(Some(5), AttributeCodec::extract_bits(&[0b1011_0100], 0, 2, 3));
    /// assert_eq!(Some(3), AttributeCodec::extract_bits(&[0b1000_0000, 0b0000_0001], 0, 7, 2));
    /// ```
    #[must_use]
    pub fn extract_bits(
        payload: &[u8],
        byte_offset: usize,
        bit_offset: u8,
        length: usize,
    ) -> Option<u32> {
        let span = usize::from(bit_offset) + length;
        if span > 32 {
            return None;
        }
        let bytes = payload.get(byte_offset..byte_offset + span.div_ceil(8))?;
        let word = bytes
            .iter()
            .enumerate()
            .fold(0u64, |word, (index, byte)| word | (u64::from(*byte) << (8 * index)));
        let mask = (1u64 << length) - 1;
        u32::try_from((word >> bit_offset) & mask).ok()
    }

    /// Returns `payload` with its first two bytes exchanged.
    ///
    /// ```
    /// use jebao::AttributeCodec;
    ///
    /// assert_eq!(vec![0x02, 0x01, 0x03], AttributeCodec::swap_endian(&[0x01, 0x02, 0x03]));
    /// assert_eq!(vec![0x01], AttributeCodec::swap_endian(&[0x01]));
    /// ```
    #[must_use]
    pub fn swap_endian(payload: &[u8]) -> Vec<u8> {
        let mut swapped = payload.to_vec();
        if swapped.len() >= 2 {
            swapped.swap(0, 1);
        }
        swapped
    }
}

fn decode_attribute(attribute: &AttributeDescriptor, payload: &[u8]) -> AttributeValue {
    let position = &attribute.position;
    match attribute.data_type {
        DataType::Bool => AttributeValue::Bool(
            AttributeCodec::extract_bits(
                payload,
                position.byte_offset,
                position.bit_offset,
                position.length,
            )
            .is_some_and(|bits| bits != 0),
        ),
        DataType::Enum => {
            let bits = AttributeCodec::extract_bits(
                payload,
                position.byte_offset,
                position.bit_offset,
                position.length,
            )
            .unwrap_or(0);
            AttributeValue::Enum(u16::try_from(bits).unwrap_or(u16::MAX))
        }
        DataType::Uint8 => AttributeValue::UInt8(payload[position.byte_offset]),
        DataType::Binary => AttributeValue::Binary(
            payload[position.byte_offset..position.byte_offset + position.length].to_vec(),
        ),
    }
}

fn encode_attribute(
    attribute: &AttributeDescriptor,
    value: &AttributeValue,
    payload: &mut [u8],
) -> Result<(), AttributeCodecError> {
    let position = &attribute.position;
    let mismatch = || AttributeCodecError::ValueTypeMismatch {
        attribute: attribute.name.clone(),
        expected: attribute.data_type,
        actual: value.data_type(),
    };

    match (attribute.data_type, value) {
        (DataType::Bool, AttributeValue::Bool(flag)) => {
            insert_bits(attribute, payload, u32::from(*flag))
        }
        (DataType::Enum, AttributeValue::Enum(index)) => {
            insert_bits(attribute, payload, u32::from(*index))
        }
        (DataType::Uint8, AttributeValue::UInt8(byte)) => {
            payload[position.byte_offset] = *byte;
            Ok(())
        }
        (DataType::Binary, AttributeValue::Binary(bytes)) => {
            let field = &mut payload[position.byte_offset..position.byte_offset + position.length];
            let copied = bytes.len().min(field.len());
            field[..copied].copy_from_slice(&bytes[..copied]);
            Ok(())
        }
        _ => Err(mismatch()),
    }
}

fn insert_bits(
    attribute: &AttributeDescriptor,
    payload: &mut [u8],
    value: u32,
) -> Result<(), AttributeCodecError> {
    let position = &attribute.position;
    if u64::from(value) >> position.length != 0 {
        return Err(AttributeCodecError::ValueOutOfRange {
            attribute: attribute.name.clone(),
            value,
            bits: position.length,
        });
    }

    let shifted = u64::from(value) << position.bit_offset;
    let mask = ((1u64 << position.length) - 1) << position.bit_offset;
    let span = usize::from(position.bit_offset) + position.length;
    for index in 0..span.div_ceil(8) {
        let byte_mask = (mask >> (8 * index)) as u8;
        let byte_bits = (shifted >> (8 * index)) as u8;
        let target = &mut payload[position.byte_offset + index];
        *target = (*target & !byte_mask) | (byte_bits & byte_mask);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;
    use crate::hw::BitPosition;

    fn power_mode_model() -> AttributeModel {
        AttributeModel::new(
            "pk-power-mode",
            vec![
                AttributeDescriptor::new("power", DataType::Bool, BitPosition::bits(0, 0, 1)),
                AttributeDescriptor::new("mode", DataType::Enum, BitPosition::bits(0, 1, 7))
                    .with_enum_values(["auto", "manual"]),
            ],
        )
        .expect("model should validate")
    }

    fn pump_model() -> AttributeModel {
        AttributeModel::new(
            "pk-pump",
            vec![
                AttributeDescriptor::new("SwitchON", DataType::Bool, BitPosition::bits(0, 0, 1)),
                AttributeDescriptor::new("Mode", DataType::Enum, BitPosition::bits(0, 1, 3))
                    .with_enum_values(["Classic", "Sine", "Random"]),
                AttributeDescriptor::new("Flow", DataType::Uint8, BitPosition::bytes(1, 1)),
                AttributeDescriptor::new("Timer", DataType::Binary, BitPosition::bytes(2, 3)),
            ],
        )
        .expect("model should validate")
    }

    #[rstest]
    #[case(&[0b1011_0100], 0, 2, 3, Some(5))]
    #[case(&[0b1011_0100, 0b0000_0011], 0, 7, 2, Some(3))]
    #[case(&[0b0011_0100, 0b0000_0011], 0, 7, 2, Some(2))]
    #[case(&[0xFF, 0x12, 0x34], 1, 0, 16, Some(0x3412))]
    #[case(&[0xFF], 0, 4, 8, None)]
    #[case(&[0xFF], 1, 0, 1, None)]
    fn extract_bits_reads_low_to_high(
        #[case] payload: &[u8],
        #[case] byte_offset: usize,
        #[case] bit_offset: u8,
        #[case] length: usize,
        #[case] expected: Option<u32>,
    ) {
        assert_eq!(
            expected,
            AttributeCodec::extract_bits(payload, byte_offset, bit_offset, length)
        );
    }

    #[rstest]
    #[case("0102", "0201")]
    #[case("010203", "020103")]
    #[case("01", "01")]
    #[case("", "")]
    fn swap_endian_only_touches_first_two_bytes(#[case] input: &str, #[case] expected: &str) {
        let input = hex::decode(input).expect("fixture should be hex");
        assert_eq!(expected, hex::encode(AttributeCodec::swap_endian(&input)));
    }

    #[test]
    fn decodes_power_and_manual_mode_from_single_byte() {
        let model = power_mode_model();
        let attributes = AttributeCodec::decode(&model, &[0x03]).expect("payload should decode");

        assert_eq!(Some(&AttributeValue::Bool(true)), attributes.get("power"));
        assert_eq!(Some(&AttributeValue::Enum(1)), attributes.get("mode"));

        let mode = model.attribute("mode").expect("mode should exist");
        assert_eq!(Some("manual"), mode.enum_label(1));
    }

    #[test]
    fn decodes_every_data_type() {
        let payload = [0b0000_0101, 80, 0x0A, 0x1E, 0x00];
        let attributes =
            AttributeCodec::decode(&pump_model(), &payload).expect("payload should decode");

        let expected = AttributeMap::from([
            ("SwitchON".to_string(), AttributeValue::Bool(true)),
            ("Mode".to_string(), AttributeValue::Enum(2)),
            ("Flow".to_string(), AttributeValue::UInt8(80)),
            (
                "Timer".to_string(),
                AttributeValue::Binary(vec![0x0A, 0x1E, 0x00]),
            ),
        ]);
        assert_eq!(expected, attributes);
    }

    #[test]
    fn out_of_range_enum_index_is_kept_without_label() {
        let model = power_mode_model();
        let attributes = AttributeCodec::decode(&model, &[0b0000_1010]).expect("payload should decode");

        assert_eq!(Some(&AttributeValue::Enum(5)), attributes.get("mode"));
        let mode = model.attribute("mode").expect("mode should exist");
        assert_eq!(None, mode.enum_label(5));
    }

    #[test]
    fn short_payload_fails_whole_decode() {
        let result = AttributeCodec::decode(&pump_model(), &[0x01, 0x02, 0x03]);
        assert_matches!(
            result,
            Err(AttributeCodecError::PayloadTooShort { attribute, required: 5, actual: 3, .. })
                if attribute == "Timer"
        );
    }

    #[test]
    fn leading_bytes_are_swapped_for_spanning_first_attribute() {
        let model = AttributeModel::new(
            "pk-wide",
            vec![AttributeDescriptor::new(
                "speed",
                DataType::Enum,
                BitPosition::bits(0, 4, 8),
            )],
        )
        .expect("model should validate");

        // Wire order 0xAB 0xCD decodes as if it were 0xCD 0xAB.
        let attributes = AttributeCodec::decode(&model, &[0xAB, 0xCD]).expect("payload should decode");
        assert_eq!(Some(&AttributeValue::Enum(0xBC)), attributes.get("speed"));
    }

    #[test]
    fn encode_produces_payload_that_decodes_back() {
        let model = pump_model();
        let attributes = AttributeMap::from([
            ("SwitchON".to_string(), AttributeValue::Bool(true)),
            ("Mode".to_string(), AttributeValue::Enum(1)),
            ("Flow".to_string(), AttributeValue::UInt8(55)),
        ]);

        let payload = AttributeCodec::encode(&model, &attributes).expect("attributes should encode");
        assert_eq!(vec![0b0000_0011, 55, 0, 0, 0], payload);
    }

    #[rstest]
    #[case("Mode", AttributeValue::Bool(true))]
    #[case("Flow", AttributeValue::Enum(1))]
    fn encode_rejects_mismatched_types(#[case] name: &str, #[case] value: AttributeValue) {
        let attributes = AttributeMap::from([(name.to_string(), value)]);
        assert_matches!(
            AttributeCodec::encode(&pump_model(), &attributes),
            Err(AttributeCodecError::ValueTypeMismatch { .. })
        );
    }

    #[test]
    fn encode_rejects_values_wider_than_field() {
        let attributes = AttributeMap::from([("Mode".to_string(), AttributeValue::Enum(8))]);
        assert_matches!(
            AttributeCodec::encode(&pump_model(), &attributes),
            Err(AttributeCodecError::ValueOutOfRange { value: 8, bits: 3, .. })
        );
    }
}
