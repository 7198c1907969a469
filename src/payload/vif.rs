//! Value information block (VIF + VIFE chain) parsing and normalisation.

use serde::Serialize;

use crate::constants::*;
use crate::error::MBusError;
use crate::payload::data_encoding::mbus_data_str_decode;
use crate::payload::record::RecordReader;
use crate::payload::vif_maps::{
    lookup_combinable_vife, lookup_primary_vif, lookup_vife_fb, lookup_vife_fd, CombinableVife,
    TimePoint, VifLookup,
};

/// Raw value information block of one data record.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ValueInformationBlock {
    pub vif: u8,
    pub vife: Vec<u8>,
    /// Unit text of a plain-text VIF (0x7C / 0xFC)
    pub custom_vif: Option<String>,
}

/// Unit, exponent and quantity resolved from a value information block.
#[derive(Debug, Clone, PartialEq)]
pub struct VifInfo {
    pub unit: String,
    pub exponent: i32,
    pub quantity: String,
    pub time_point: Option<TimePoint>,
    /// Combinable VIFE qualifiers, e.g. "per hour" or a record error text
    pub extensions: Vec<String>,
}

/// Reads a VIF, an optional plain-text unit and the VIFE chain.
pub(crate) fn parse_vib(reader: &mut RecordReader<'_>) -> Result<ValueInformationBlock, MBusError> {
    let vif = reader.byte()?;

    let custom_vif = if vif & MBUS_DIB_VIF_WITHOUT_EXTENSION == MBUS_VIF_PLAIN_TEXT {
        let len = reader.byte()? as usize;
        Some(mbus_data_str_decode(reader.take(len)?))
    } else {
        None
    };

    let mut vife = Vec::new();
    let mut extension = vif & MBUS_DIB_VIF_EXTENSION_BIT != 0;
    while extension {
        if vife.len() == MBUS_DIB_VIFE_MAX {
            return Err(MBusError::VifTooLong);
        }
        let byte = reader.byte()?;
        vife.push(byte);
        extension = byte & MBUS_DIB_VIF_EXTENSION_BIT != 0;
    }

    Ok(ValueInformationBlock {
        vif,
        vife,
        custom_vif,
    })
}

/// Resolves the unit, decimal exponent and quantity described by a VIB.
///
/// Unknown codes resolve to an empty unit with quantity "Reserved" rather
/// than an error, so a record with an exotic VIF still yields its value.
pub fn normalize_vib(vib: &ValueInformationBlock) -> VifInfo {
    let reserved = || VifLookup {
        unit: "",
        exponent: 0,
        quantity: "Reserved",
        time_point: None,
    };
    let nothing: &[u8] = &[];

    let (base, combinable): (VifLookup, &[u8]) = match vib.vif {
        MBUS_VIF_EXTENSION_FD | MBUS_VIF_EXTENSION_FB => match vib.vife.split_first() {
            Some((code, rest)) => {
                let found = if vib.vif == MBUS_VIF_EXTENSION_FD {
                    lookup_vife_fd(*code)
                } else {
                    lookup_vife_fb(*code)
                };
                (found.unwrap_or_else(reserved), rest)
            }
            None => (reserved(), nothing),
        },
        vif => match vif & MBUS_DIB_VIF_WITHOUT_EXTENSION {
            MBUS_VIF_PLAIN_TEXT => (
                VifLookup {
                    unit: "",
                    exponent: 0,
                    quantity: "Plain text",
                    time_point: None,
                },
                &vib.vife[..],
            ),
            MBUS_VIF_ANY => (
                VifLookup {
                    unit: "",
                    exponent: 0,
                    quantity: "Any VIF",
                    time_point: None,
                },
                &vib.vife[..],
            ),
            // VIFEs after a manufacturer specific VIF carry no standard meaning
            MBUS_VIF_MANUFACTURER_SPECIFIC => (
                VifLookup {
                    unit: "",
                    exponent: 0,
                    quantity: "Manufacturer specific",
                    time_point: None,
                },
                nothing,
            ),
            code => (lookup_primary_vif(code).unwrap_or_else(reserved), &vib.vife[..]),
        },
    };

    let mut info = VifInfo {
        unit: vib
            .custom_vif
            .clone()
            .unwrap_or_else(|| base.unit.to_string()),
        exponent: base.exponent,
        quantity: base.quantity.to_string(),
        time_point: base.time_point,
        extensions: Vec::new(),
    };

    for code in combinable {
        match lookup_combinable_vife(*code) {
            CombinableVife::Description(text) => info.extensions.push(text),
            CombinableVife::Exponent(delta) => info.exponent += delta,
            CombinableVife::ManufacturerSpecific => {
                info.extensions.push("Manufacturer specific".to_string());
                break;
            }
        }
    }

    info
}
