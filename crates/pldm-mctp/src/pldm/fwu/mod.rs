// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! PLDM for firmware update (DSP0267): inventory commands.
//!
//! Only the two inventory queries are decoded here. Decoders take the bytes
//! that follow the completion code and read every field through
//! [`Reader`], so a length that runs past the buffer is a [`DecodeError`].

pub mod inventory;

pub use inventory::{FirmwareInventory, InventoryError};

use crate::wire::{DecodeError, Reader};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// QueryDeviceIdentifiers command code.
pub const QUERY_DEVICE_IDENTIFIERS: u8 = 0x01;

/// GetFirmwareParameters command code.
pub const GET_FIRMWARE_PARAMETERS: u8 = 0x02;

/// Size of the fixed part of one component parameter table entry.
pub const COMPONENT_ENTRY_SIZE: usize = 39;

/// One inventory property value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    String(String),
}

/// Named properties of a device or of one component.
pub type FwuProperties = BTreeMap<String, PropertyValue>;

/// Component properties keyed by component index.
pub type CompPropertiesMap = BTreeMap<u16, FwuProperties>;

/// Complete inventory of one terminus.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryRecord {
    /// Descriptor and component image set properties.
    pub device: FwuProperties,
    pub components: CompPropertiesMap,
}

/// Descriptor identifier types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum DescriptorType {
    PciVendorId = 0x0000,
    IanaEnterpriseId = 0x0001,
    Uuid = 0x0002,
    PnpVendorId = 0x0003,
    AcpiVendorId = 0x0004,
    PciDeviceId = 0x0100,
    PciSubsystemVendorId = 0x0101,
    PciSubsystemId = 0x0102,
    PciRevisionId = 0x0103,
    PnpProductIdentifier = 0x0104,
    AcpiProductIdentifier = 0x0105,
    VendorDefined = 0xffff,
}

impl DescriptorType {
    pub fn from_u16(v: u16) -> Option<Self> {
        Some(match v {
            0x0000 => Self::PciVendorId,
            0x0001 => Self::IanaEnterpriseId,
            0x0002 => Self::Uuid,
            0x0003 => Self::PnpVendorId,
            0x0004 => Self::AcpiVendorId,
            0x0100 => Self::PciDeviceId,
            0x0101 => Self::PciSubsystemVendorId,
            0x0102 => Self::PciSubsystemId,
            0x0103 => Self::PciRevisionId,
            0x0104 => Self::PnpProductIdentifier,
            0x0105 => Self::AcpiProductIdentifier,
            0xffff => Self::VendorDefined,
            _ => return None,
        })
    }

    /// Property name the descriptor is published under.
    pub fn property_name(self) -> &'static str {
        match self {
            Self::PciVendorId => "PCIVendorID",
            Self::IanaEnterpriseId => "IANAEnterpriseID",
            Self::Uuid => "UUID",
            Self::PnpVendorId => "PnPVendorID",
            Self::AcpiVendorId => "ACPIVendorID",
            Self::PciDeviceId => "PCIDeviceID",
            Self::PciSubsystemVendorId => "PCISubsystemVendorID",
            Self::PciSubsystemId => "PCISubsystemID",
            Self::PciRevisionId => "PCIRevisionID",
            Self::PnpProductIdentifier => "PnPProductIdentifier",
            Self::AcpiProductIdentifier => "ACPIProductIdentifier",
            Self::VendorDefined => "VendorDefined",
        }
    }

    /// Required value length; `None` for variable-length descriptors.
    fn fixed_len(self) -> Option<usize> {
        match self {
            Self::PciVendorId
            | Self::PciDeviceId
            | Self::PciSubsystemVendorId
            | Self::PciSubsystemId => Some(2),
            Self::PciRevisionId => Some(1),
            Self::PnpVendorId => Some(3),
            Self::IanaEnterpriseId
            | Self::AcpiVendorId
            | Self::PnpProductIdentifier
            | Self::AcpiProductIdentifier => Some(4),
            Self::Uuid => Some(16),
            Self::VendorDefined => None,
        }
    }
}

/// Version string encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StringType {
    Unknown = 0,
    Ascii = 1,
    Utf8 = 2,
    Utf16 = 3,
    Utf16Le = 4,
    Utf16Be = 5,
}

impl StringType {
    pub fn from_u8(v: u8) -> Result<Self, DecodeError> {
        match v {
            0 => Ok(Self::Unknown),
            1 => Ok(Self::Ascii),
            2 => Ok(Self::Utf8),
            3 => Ok(Self::Utf16),
            4 => Ok(Self::Utf16Le),
            5 => Ok(Self::Utf16Be),
            _ => Err(DecodeError::InvalidValue {
                field: "version string type",
                value: u32::from(v),
            }),
        }
    }
}

/// Decode a version string; undecodable units are replaced, not rejected.
pub fn decode_string(kind: StringType, bytes: &[u8]) -> Result<String, DecodeError> {
    let s = match kind {
        StringType::Unknown | StringType::Ascii | StringType::Utf8 => {
            String::from_utf8_lossy(bytes).into_owned()
        }
        StringType::Utf16 | StringType::Utf16Le | StringType::Utf16Be => {
            if bytes.len() % 2 != 0 {
                return Err(DecodeError::LengthMismatch {
                    field: "utf-16 version string",
                    expected: bytes.len() + 1,
                    actual: bytes.len(),
                });
            }
            let units: Vec<u16> = bytes
                .chunks_exact(2)
                .map(|c| {
                    if kind == StringType::Utf16Be {
                        u16::from_be_bytes([c[0], c[1]])
                    } else {
                        u16::from_le_bytes([c[0], c[1]])
                    }
                })
                .collect();
            String::from_utf16_lossy(&units)
        }
    };
    Ok(s.trim_end_matches('\0').to_string())
}

fn format_uuid(b: &[u8; 16]) -> String {
    let hex = |s: &[u8]| s.iter().map(|b| format!("{:02x}", b)).collect::<String>();
    format!(
        "{}-{}-{}-{}-{}",
        hex(&b[0..4]),
        hex(&b[4..6]),
        hex(&b[6..8]),
        hex(&b[8..10]),
        hex(&b[10..16])
    )
}

fn decode_descriptor(
    kind: DescriptorType,
    value: &mut Reader<'_>,
) -> Result<PropertyValue, DecodeError> {
    if let Some(expected) = kind.fixed_len() {
        if value.remaining() != expected {
            return Err(DecodeError::LengthMismatch {
                field: kind.property_name(),
                expected,
                actual: value.remaining(),
            });
        }
    }

    Ok(match kind {
        DescriptorType::PciVendorId
        | DescriptorType::PciDeviceId
        | DescriptorType::PciSubsystemVendorId
        | DescriptorType::PciSubsystemId => PropertyValue::U16(value.u16_le(kind.property_name())?),
        DescriptorType::PciRevisionId => PropertyValue::U8(value.u8(kind.property_name())?),
        DescriptorType::IanaEnterpriseId
        | DescriptorType::PnpProductIdentifier
        | DescriptorType::AcpiProductIdentifier => {
            PropertyValue::U32(value.u32_le(kind.property_name())?)
        }
        DescriptorType::PnpVendorId | DescriptorType::AcpiVendorId => {
            PropertyValue::String(String::from_utf8_lossy(value.rest()).into_owned())
        }
        DescriptorType::Uuid => PropertyValue::String(format_uuid(&value.array("UUID")?)),
        DescriptorType::VendorDefined => {
            let title_type = StringType::from_u8(value.u8("vendor title type")?)?;
            let title_len = value.u8("vendor title length")?;
            let title = value.bytes("vendor title", usize::from(title_len))?;
            PropertyValue::String(decode_string(title_type, title)?)
        }
    })
}

/// Decode a QueryDeviceIdentifiers response body.
pub fn decode_device_identifiers(r: &mut Reader<'_>) -> Result<FwuProperties, DecodeError> {
    let len = r.u32_le("device identifiers length")?;
    let count = r.u8("descriptor count")?;
    let mut records = r.sub("device identifiers", len as usize)?;

    let mut props = FwuProperties::new();
    for _ in 0..count {
        let kind = records.u16_le("descriptor type")?;
        let size = records.u16_le("descriptor length")?;
        let mut value = records.sub("descriptor value", usize::from(size))?;
        match DescriptorType::from_u16(kind) {
            Some(known) => {
                let v = decode_descriptor(known, &mut value)?;
                props.insert(known.property_name().to_string(), v);
            }
            None => debug!("Skipping unknown descriptor type 0x{:04x}", kind),
        }
    }
    if !records.is_empty() {
        debug!(
            "{} trailing bytes after {} descriptors",
            records.remaining(),
            count
        );
    }
    Ok(props)
}

fn insert(props: &mut FwuProperties, key: &str, value: PropertyValue) {
    props.insert(key.to_string(), value);
}

fn release_date(bytes: &[u8; 8]) -> String {
    String::from_utf8_lossy(bytes)
        .trim_end_matches('\0')
        .to_string()
}

/// Decode a GetFirmwareParameters response body into image set properties
/// and per-component properties.
pub fn decode_firmware_parameters(
    r: &mut Reader<'_>,
) -> Result<(FwuProperties, CompPropertiesMap), DecodeError> {
    let caps = r.u32_le("capabilities during update")?;
    let count = r.u16_le("component count")?;
    let active_type = StringType::from_u8(r.u8("active image set string type")?)?;
    let active_len = r.u8("active image set string length")?;
    let pending_type = StringType::from_u8(r.u8("pending image set string type")?)?;
    let pending_len = r.u8("pending image set string length")?;
    let active = r.bytes("active image set version", usize::from(active_len))?;
    let pending = r.bytes("pending image set version", usize::from(pending_len))?;

    let mut device = FwuProperties::new();
    insert(&mut device, "CapabilitiesDuringUpdate", PropertyValue::U32(caps));
    insert(&mut device, "ComponentCount", PropertyValue::U16(count));
    insert(
        &mut device,
        "ActiveCompImgSetVerStr",
        PropertyValue::String(decode_string(active_type, active)?),
    );
    if pending_len > 0 {
        insert(
            &mut device,
            "PendingCompImgSetVerStr",
            PropertyValue::String(decode_string(pending_type, pending)?),
        );
    }

    let mut components = CompPropertiesMap::new();
    for index in 0..count {
        components.insert(index, decode_component(r)?);
    }
    Ok((device, components))
}

fn decode_component(r: &mut Reader<'_>) -> Result<FwuProperties, DecodeError> {
    let mut fixed = r.sub("component parameter entry", COMPONENT_ENTRY_SIZE)?;
    let classification = fixed.u16_le("component classification")?;
    let identifier = fixed.u16_le("component identifier")?;
    let class_index = fixed.u8("component classification index")?;
    let active_stamp = fixed.u32_le("active comparison stamp")?;
    let active_type = StringType::from_u8(fixed.u8("active version string type")?)?;
    let active_len = fixed.u8("active version string length")?;
    let active_date = fixed.array::<8>("active release date")?;
    let pending_stamp = fixed.u32_le("pending comparison stamp")?;
    let pending_type = StringType::from_u8(fixed.u8("pending version string type")?)?;
    let pending_len = fixed.u8("pending version string length")?;
    let pending_date = fixed.array::<8>("pending release date")?;
    let activation = fixed.u16_le("activation methods")?;
    let caps = fixed.u32_le("component capabilities")?;

    let active = r.bytes("active version string", usize::from(active_len))?;
    let pending = r.bytes("pending version string", usize::from(pending_len))?;

    let mut props = FwuProperties::new();
    insert(&mut props, "ComponentClassification", PropertyValue::U16(classification));
    insert(&mut props, "ComponentIdentifier", PropertyValue::U16(identifier));
    insert(&mut props, "ComponentClassificationIndex", PropertyValue::U8(class_index));
    insert(&mut props, "ActiveComponentComparisonStamp", PropertyValue::U32(active_stamp));
    insert(
        &mut props,
        "ActiveComponentVersionString",
        PropertyValue::String(decode_string(active_type, active)?),
    );
    insert(
        &mut props,
        "ActiveComponentReleaseDate",
        PropertyValue::String(release_date(&active_date)),
    );
    insert(&mut props, "PendingComponentComparisonStamp", PropertyValue::U32(pending_stamp));
    insert(
        &mut props,
        "PendingComponentVersionString",
        PropertyValue::String(decode_string(pending_type, pending)?),
    );
    insert(
        &mut props,
        "PendingComponentReleaseDate",
        PropertyValue::String(release_date(&pending_date)),
    );
    insert(&mut props, "ComponentActivationMethods", PropertyValue::U16(activation));
    insert(&mut props, "CapabilitiesDuringUpdate", PropertyValue::U32(caps));
    Ok(props)
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn test_device_identifiers() {
        let uuid: Vec<u8> = (0u8..16).collect();
        let body = device_identifiers(&[
            descriptor(0x0000, &0x8086u16.to_le_bytes()),
            descriptor(0x0002, &uuid),
            descriptor(0x0103, &[0x04]),
            descriptor(0x0003, b"ABC"),
            descriptor(0x7777, &[1, 2, 3]),
        ]);
        let props = decode_device_identifiers(&mut Reader::new(&body)).unwrap();

        assert_eq!(props["PCIVendorID"], PropertyValue::U16(0x8086));
        assert_eq!(props["PCIRevisionID"], PropertyValue::U8(0x04));
        assert_eq!(props["PnPVendorID"], PropertyValue::String("ABC".into()));
        assert_eq!(
            props["UUID"],
            PropertyValue::String("00010203-0405-0607-0809-0a0b0c0d0e0f".into())
        );
        assert_eq!(props.len(), 4);
    }

    #[test]
    fn test_descriptor_past_buffer_end() {
        let mut body = device_identifiers(&[descriptor(0x0000, &[0x86, 0x80])]);
        // Declare a longer value than the record carries.
        body[7] = 0x10;
        assert!(matches!(
            decode_device_identifiers(&mut Reader::new(&body)),
            Err(DecodeError::Truncated { .. })
        ));

        // Declared count larger than the records present.
        let mut body = device_identifiers(&[descriptor(0x0000, &[0x86, 0x80])]);
        body[4] = 2;
        assert!(decode_device_identifiers(&mut Reader::new(&body)).is_err());

        // Outer length past the buffer.
        let mut body = device_identifiers(&[descriptor(0x0000, &[0x86, 0x80])]);
        body[0] = 0xff;
        assert!(decode_device_identifiers(&mut Reader::new(&body)).is_err());
    }

    #[test]
    fn test_descriptor_wrong_length() {
        let body = device_identifiers(&[descriptor(0x0000, &[0x86, 0x80, 0x00])]);
        assert!(matches!(
            decode_device_identifiers(&mut Reader::new(&body)),
            Err(DecodeError::LengthMismatch {
                field: "PCIVendorID",
                expected: 2,
                actual: 3
            })
        ));
    }

    #[test]
    fn test_vendor_defined_title() {
        let mut value = vec![1, 4];
        value.extend_from_slice(b"ACME");
        value.extend_from_slice(&[0xde, 0xad]);
        let body = device_identifiers(&[descriptor(0xffff, &value)]);
        let props = decode_device_identifiers(&mut Reader::new(&body)).unwrap();
        assert_eq!(props["VendorDefined"], PropertyValue::String("ACME".into()));
    }

    #[test]
    fn test_firmware_parameters() {
        let body = firmware_parameters(
            "bundle-1.2",
            &[component(0x0010, "1.0.3", ""), component(0x0020, "2.1", "2.2")],
        );
        let (device, components) = decode_firmware_parameters(&mut Reader::new(&body)).unwrap();

        assert_eq!(device["ComponentCount"], PropertyValue::U16(2));
        assert_eq!(device["CapabilitiesDuringUpdate"], PropertyValue::U32(3));
        assert_eq!(
            device["ActiveCompImgSetVerStr"],
            PropertyValue::String("bundle-1.2".into())
        );
        assert!(!device.contains_key("PendingCompImgSetVerStr"));

        assert_eq!(components.len(), 2);
        let second = &components[&1];
        assert_eq!(second["ComponentIdentifier"], PropertyValue::U16(0x0020));
        assert_eq!(
            second["ActiveComponentVersionString"],
            PropertyValue::String("2.1".into())
        );
        assert_eq!(
            second["PendingComponentVersionString"],
            PropertyValue::String("2.2".into())
        );
        assert_eq!(
            second["ActiveComponentReleaseDate"],
            PropertyValue::String("20250301".into())
        );
        assert_eq!(
            second["ActiveComponentComparisonStamp"],
            PropertyValue::U32(0x0102_0304)
        );
        assert_eq!(second.len(), 11);
    }

    #[test]
    fn test_firmware_parameters_count_exceeds_entries() {
        let mut body = firmware_parameters("b", &[component(1, "1", "")]);
        body[4] = 2;
        assert!(matches!(
            decode_firmware_parameters(&mut Reader::new(&body)),
            Err(DecodeError::Truncated { .. })
        ));
    }

    #[test]
    fn test_utf16_strings() {
        let le: Vec<u8> = "v1".encode_utf16().flat_map(|u| u.to_le_bytes()).collect();
        assert_eq!(decode_string(StringType::Utf16Le, &le).unwrap(), "v1");
        let be: Vec<u8> = "v1".encode_utf16().flat_map(|u| u.to_be_bytes()).collect();
        assert_eq!(decode_string(StringType::Utf16Be, &be).unwrap(), "v1");
        assert!(decode_string(StringType::Utf16, &[0x76]).is_err());
        assert!(StringType::from_u8(9).is_err());
    }

    #[test]
    fn test_record_serializes_untagged() {
        let mut record = InventoryRecord::default();
        record
            .device
            .insert("PCIVendorID".into(), PropertyValue::U16(0x8086));
        let json = serde_json::to_string(&record).unwrap();
        assert_eq!(json, r#"{"device":{"PCIVendorID":32902},"components":{}}"#);
    }
}
