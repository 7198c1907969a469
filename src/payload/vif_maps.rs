//! VIF/VIFE Mapping Tables and Lookup Functions
//!
//! This module provides lookups for M-Bus Value Information Fields (VIF)
//! and Value Information Field Extensions (VIFE) as defined in EN 13757-3.
//!
//! Most VIF codes come in runs where the low bits select a decimal exponent,
//! so the tables hold ranges: the exponent of a code is
//! `code - first + exponent` for [`VifUnit::Scaled`] entries. Durations select
//! their unit (seconds, minutes, ...) from the low bits instead.

/// How a VIF range resolves its unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VifUnit {
    /// Fixed unit; the low bits of the code add to the exponent.
    Scaled(&'static str),
    /// The offset into the range picks the unit; the exponent is fixed.
    Indexed(&'static [&'static str]),
}

/// Whether the value of a record is a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimePoint {
    /// Type G date
    Date,
    /// Type F or type I date and time, depending on the data width
    DateTime,
}

/// One run of VIF codes sharing quantity and unit.
#[derive(Debug, Clone, Copy)]
pub struct VifRange {
    pub first: u8,
    pub last: u8,
    pub unit: VifUnit,
    pub exponent: i32,
    pub quantity: &'static str,
    pub time_point: Option<TimePoint>,
}

const DURATION: &[&str] = &["s", "min", "h", "days"];
const DURATION_MIN: &[&str] = &["min", "h", "days"];
const DURATION_LONG: &[&str] = &["h", "days", "months", "years"];
const MONTHS: &[&str] = &["months"];
const YEARS: &[&str] = &["years"];

const fn scaled(first: u8, last: u8, unit: &'static str, exponent: i32, quantity: &'static str) -> VifRange {
    VifRange {
        first,
        last,
        unit: VifUnit::Scaled(unit),
        exponent,
        quantity,
        time_point: None,
    }
}

const fn indexed(first: u8, last: u8, units: &'static [&'static str], quantity: &'static str) -> VifRange {
    VifRange {
        first,
        last,
        unit: VifUnit::Indexed(units),
        exponent: 0,
        quantity,
        time_point: None,
    }
}

const fn single(code: u8, unit: &'static str, quantity: &'static str) -> VifRange {
    scaled(code, code, unit, 0, quantity)
}

const fn time_point(code: u8, kind: TimePoint, quantity: &'static str) -> VifRange {
    VifRange {
        first: code,
        last: code,
        unit: VifUnit::Scaled(""),
        exponent: 0,
        quantity,
        time_point: Some(kind),
    }
}

/// Primary VIF codes (extension bit masked off).
pub const VIF_TABLE: &[VifRange] = &[
    scaled(0x00, 0x07, "Wh", -3, "Energy"),
    scaled(0x08, 0x0F, "J", 0, "Energy"),
    scaled(0x10, 0x17, "m^3", -6, "Volume"),
    scaled(0x18, 0x1F, "kg", -3, "Mass"),
    indexed(0x20, 0x23, DURATION, "On time"),
    indexed(0x24, 0x27, DURATION, "Operating time"),
    scaled(0x28, 0x2F, "W", -3, "Power"),
    scaled(0x30, 0x37, "J/h", 0, "Power"),
    scaled(0x38, 0x3F, "m^3/h", -6, "Volume flow"),
    scaled(0x40, 0x47, "m^3/min", -7, "Volume flow"),
    scaled(0x48, 0x4F, "m^3/s", -9, "Volume flow"),
    scaled(0x50, 0x57, "kg/h", -3, "Mass flow"),
    scaled(0x58, 0x5B, "°C", -3, "Flow temperature"),
    scaled(0x5C, 0x5F, "°C", -3, "Return temperature"),
    scaled(0x60, 0x63, "K", -3, "Temperature difference"),
    scaled(0x64, 0x67, "°C", -3, "External temperature"),
    scaled(0x68, 0x6B, "bar", -3, "Pressure"),
    time_point(0x6C, TimePoint::Date, "Time point (date)"),
    time_point(0x6D, TimePoint::DateTime, "Time point (date & time)"),
    single(0x6E, "", "Units for H.C.A."),
    single(0x6F, "", "Reserved"),
    indexed(0x70, 0x73, DURATION, "Averaging duration"),
    indexed(0x74, 0x77, DURATION, "Actuality duration"),
    single(0x78, "", "Fabrication number"),
    single(0x79, "", "Enhanced identification"),
    single(0x7A, "", "Bus address"),
];

/// Main extension table, selected by VIF 0xFD.
pub const VIF_FD_TABLE: &[VifRange] = &[
    scaled(0x00, 0x03, "Currency units", -3, "Credit"),
    scaled(0x04, 0x07, "Currency units", -3, "Debit"),
    single(0x08, "", "Access number (transmission count)"),
    single(0x09, "", "Medium"),
    single(0x0A, "", "Manufacturer"),
    single(0x0B, "", "Parameter set identification"),
    single(0x0C, "", "Model / Version"),
    single(0x0D, "", "Hardware version"),
    single(0x0E, "", "Firmware version"),
    single(0x0F, "", "Software version"),
    single(0x10, "", "Customer location"),
    single(0x11, "", "Customer"),
    single(0x12, "", "Access code user"),
    single(0x13, "", "Access code operator"),
    single(0x14, "", "Access code system operator"),
    single(0x15, "", "Access code developer"),
    single(0x16, "", "Password"),
    single(0x17, "", "Error flags"),
    single(0x18, "", "Error mask"),
    single(0x1A, "", "Digital output"),
    single(0x1B, "", "Digital input"),
    single(0x1C, "Baud", "Baudrate"),
    single(0x1D, "Bittimes", "Response delay time"),
    single(0x1E, "", "Retry"),
    single(0x20, "", "First storage number for cyclic storage"),
    single(0x21, "", "Last storage number for cyclic storage"),
    single(0x22, "", "Size of storage block"),
    indexed(0x24, 0x27, DURATION, "Storage interval"),
    indexed(0x28, 0x28, MONTHS, "Storage interval"),
    indexed(0x29, 0x29, YEARS, "Storage interval"),
    indexed(0x2C, 0x2F, DURATION, "Duration since last readout"),
    time_point(0x30, TimePoint::DateTime, "Start of tariff"),
    indexed(0x31, 0x33, DURATION_MIN, "Duration of tariff"),
    indexed(0x34, 0x37, DURATION, "Period of tariff"),
    indexed(0x38, 0x38, MONTHS, "Period of tariff"),
    indexed(0x39, 0x39, YEARS, "Period of tariff"),
    single(0x3A, "", "Dimensionless"),
    scaled(0x40, 0x4F, "V", -9, "Voltage"),
    scaled(0x50, 0x5F, "A", -12, "Current"),
    single(0x60, "", "Reset counter"),
    single(0x61, "", "Cumulation counter"),
    single(0x62, "", "Control signal"),
    single(0x63, "", "Day of week"),
    single(0x64, "", "Week number"),
    single(0x65, "", "Time point of day change"),
    single(0x66, "", "State of parameter activation"),
    single(0x67, "", "Special supplier information"),
    indexed(0x68, 0x6B, DURATION_LONG, "Duration since last cumulation"),
    indexed(0x6C, 0x6F, DURATION_LONG, "Operating time battery"),
    time_point(0x70, TimePoint::DateTime, "Date and time of battery change"),
];

/// Alternate extension table, selected by VIF 0xFB.
pub const VIF_FB_TABLE: &[VifRange] = &[
    scaled(0x00, 0x01, "MWh", -1, "Energy"),
    scaled(0x08, 0x09, "GJ", -1, "Energy"),
    scaled(0x10, 0x11, "m^3", 2, "Volume"),
    scaled(0x18, 0x19, "t", 2, "Mass"),
    scaled(0x21, 0x21, "feet^3", -1, "Volume"),
    scaled(0x22, 0x23, "American gallon", -1, "Volume"),
    scaled(0x24, 0x24, "American gallon/min", -3, "Volume flow"),
    single(0x25, "American gallon/min", "Volume flow"),
    single(0x26, "American gallon/h", "Volume flow"),
    scaled(0x28, 0x29, "MW", -1, "Power"),
    scaled(0x30, 0x31, "GJ/h", -1, "Power"),
    scaled(0x58, 0x5B, "°F", -3, "Flow temperature"),
    scaled(0x5C, 0x5F, "°F", -3, "Return temperature"),
    scaled(0x60, 0x63, "°F", -3, "Temperature difference"),
    scaled(0x64, 0x67, "°F", -3, "External temperature"),
    scaled(0x70, 0x73, "°F", -3, "Cold / Warm Temperature Limit"),
    scaled(0x74, 0x77, "°C", -3, "Cold / Warm Temperature Limit"),
    scaled(0x78, 0x7F, "W", -3, "Cumul count max power"),
];

/// Resolved meaning of one table code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VifLookup {
    pub unit: &'static str,
    pub exponent: i32,
    pub quantity: &'static str,
    pub time_point: Option<TimePoint>,
}

fn lookup(table: &[VifRange], code: u8) -> Option<VifLookup> {
    let code = code & 0x7F;
    let range = table.iter().find(|r| (r.first..=r.last).contains(&code))?;
    let offset = code - range.first;
    let (unit, exponent) = match range.unit {
        VifUnit::Scaled(unit) => (unit, range.exponent + offset as i32),
        VifUnit::Indexed(units) => (units.get(offset as usize).copied()?, range.exponent),
    };
    Some(VifLookup {
        unit,
        exponent,
        quantity: range.quantity,
        time_point: range.time_point,
    })
}

/// Looks up a primary VIF (extension bit ignored).
pub fn lookup_primary_vif(code: u8) -> Option<VifLookup> {
    lookup(VIF_TABLE, code)
}

/// Looks up the first VIFE after VIF 0xFD.
pub fn lookup_vife_fd(code: u8) -> Option<VifLookup> {
    lookup(VIF_FD_TABLE, code)
}

/// Looks up the first VIFE after VIF 0xFB.
pub fn lookup_vife_fb(code: u8) -> Option<VifLookup> {
    lookup(VIF_FB_TABLE, code)
}

/// Meaning of a combinable (orthogonal) VIFE.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CombinableVife {
    /// Free-text qualifier such as "per hour" or a record error code.
    Description(String),
    /// Multiplicative correction: add to the exponent.
    Exponent(i32),
    /// Everything that follows is manufacturer specific.
    ManufacturerSpecific,
}

const RECORD_ERRORS: [&str; 32] = [
    "None",
    "Too many DIFEs",
    "Storage number not implemented",
    "Unit number not implemented",
    "Tariff number not implemented",
    "Function not implemented",
    "Data class not implemented",
    "Data size not implemented",
    "Reserved",
    "Reserved",
    "Reserved",
    "Too many VIFEs",
    "Illegal VIF-Group",
    "Illegal VIF-Exponent",
    "VIF/DIF mismatch",
    "Unimplemented action",
    "Reserved",
    "Reserved",
    "Reserved",
    "Reserved",
    "Reserved",
    "No data available (undefined value)",
    "Data overflow",
    "Data underflow",
    "Data error",
    "Reserved",
    "Reserved",
    "Reserved",
    "Premature end of record",
    "Reserved",
    "Reserved",
    "Reserved",
];

const QUALIFIERS: [&str; 32] = [
    "per second",
    "per minute",
    "per hour",
    "per day",
    "per week",
    "per month",
    "per year",
    "per revolution / measurement",
    "increment per input pulse on input channel #0",
    "increment per input pulse on input channel #1",
    "increment per output pulse on output channel #0",
    "increment per output pulse on output channel #1",
    "per liter",
    "per m^3",
    "per kg",
    "per K (Kelvin)",
    "per kWh",
    "per GJ",
    "per kW",
    "per (K*l) (Kelvin*liter)",
    "per V (Volt)",
    "per A (Ampere)",
    "multiplied by s",
    "multiplied by s / V",
    "multiplied by s / A",
    "start date(/time) of",
    "VIF contains uncorrected unit instead of corrected unit",
    "Accumulation only if positive contributions",
    "Accumulation of abs value only if negative contributions",
    "Reserved",
    "Reserved",
    "Reserved",
];

/// Interprets a combinable VIFE (extension bit ignored).
pub fn lookup_combinable_vife(code: u8) -> CombinableVife {
    let code = code & 0x7F;
    let first_last = |bit: u8| if code & bit != 0 { "last" } else { "first" };
    let lower_upper = if code & 0x08 != 0 { "upper" } else { "lower" };

    let text = match code {
        0x00..=0x1F => RECORD_ERRORS[code as usize].to_string(),
        0x20..=0x3F => QUALIFIERS[(code - 0x20) as usize].to_string(),
        0x40 | 0x48 => format!("{lower_upper} limit value"),
        0x41 | 0x49 => format!("# of exceeds of {lower_upper} limit"),
        0x42 | 0x43 | 0x46 | 0x47 | 0x4A | 0x4B | 0x4E | 0x4F => {
            let begin_end = if code & 0x01 != 0 { "end" } else { "begin" };
            format!(
                "Date (/time) of {begin_end} of {} {lower_upper} limit exceed",
                first_last(0x04)
            )
        }
        0x50..=0x5F => format!(
            "Duration of {} {lower_upper} limit exceed [{}]",
            first_last(0x04),
            DURATION[(code & 0x03) as usize]
        ),
        0x60..=0x67 => format!(
            "Duration of {} [{}]",
            first_last(0x04),
            DURATION[(code & 0x03) as usize]
        ),
        // E110 1f1b, bit 1 set
        0x6A | 0x6B | 0x6E | 0x6F => {
            let begin_end = if code & 0x01 != 0 { "end" } else { "begin" };
            format!("Date (/time) of {} {begin_end}", first_last(0x04))
        }
        0x70..=0x77 => return CombinableVife::Exponent((code & 0x07) as i32 - 6),
        0x78..=0x7B => format!(
            "Additive correction constant: unit of VIF * 10^{}",
            (code & 0x03) as i32 - 3
        ),
        0x7D => return CombinableVife::Exponent(3),
        0x7E => "Future value".to_string(),
        0x7F => return CombinableVife::ManufacturerSpecific,
        _ => "Reserved".to_string(),
    };
    CombinableVife::Description(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scaled_ranges() {
        let energy = lookup_primary_vif(0x06).unwrap();
        assert_eq!((energy.unit, energy.exponent, energy.quantity), ("Wh", 3, "Energy"));

        let volume = lookup_primary_vif(0x15).unwrap();
        assert_eq!((volume.unit, volume.exponent), ("m^3", -1));

        let flow = lookup_primary_vif(0x5B).unwrap();
        assert_eq!((flow.unit, flow.exponent, flow.quantity), ("°C", 0, "Flow temperature"));

        // extension bit is ignored
        assert_eq!(lookup_primary_vif(0x86), lookup_primary_vif(0x06));
    }

    #[test]
    fn test_duration_ranges() {
        let on_time = lookup_primary_vif(0x22).unwrap();
        assert_eq!((on_time.unit, on_time.exponent), ("h", 0));
        let tariff = lookup_vife_fd(0x31).unwrap();
        assert_eq!(tariff.unit, "min");
    }

    #[test]
    fn test_time_points() {
        assert_eq!(lookup_primary_vif(0x6C).unwrap().time_point, Some(TimePoint::Date));
        assert_eq!(
            lookup_primary_vif(0x6D).unwrap().time_point,
            Some(TimePoint::DateTime)
        );
    }

    #[test]
    fn test_extension_tables() {
        let voltage = lookup_vife_fd(0x48).unwrap();
        assert_eq!((voltage.unit, voltage.exponent), ("V", -1));
        assert_eq!(lookup_vife_fd(0x08).unwrap().quantity, "Access number (transmission count)");
        assert!(lookup_vife_fd(0x7F).is_none());

        let energy = lookup_vife_fb(0x01).unwrap();
        assert_eq!((energy.unit, energy.exponent), ("MWh", 0));
        assert!(lookup_vife_fb(0x02).is_none());
    }

    #[test]
    fn test_combinable_vife() {
        assert_eq!(
            lookup_combinable_vife(0x22),
            CombinableVife::Description("per hour".into())
        );
        assert_eq!(lookup_combinable_vife(0x73), CombinableVife::Exponent(-3));
        assert_eq!(lookup_combinable_vife(0x7D), CombinableVife::Exponent(3));
        assert_eq!(lookup_combinable_vife(0xFF), CombinableVife::ManufacturerSpecific);
        assert_eq!(
            lookup_combinable_vife(0x15),
            CombinableVife::Description("No data available (undefined value)".into())
        );
    }

    #[test]
    fn test_begin_end_date_vifes() {
        assert_eq!(
            lookup_combinable_vife(0x6A),
            CombinableVife::Description("Date (/time) of first begin".into())
        );
        assert_eq!(
            lookup_combinable_vife(0xEF),
            CombinableVife::Description("Date (/time) of last end".into())
        );
        for reserved in [0x68, 0x69, 0x6C, 0x6D] {
            assert_eq!(
                lookup_combinable_vife(reserved),
                CombinableVife::Description("Reserved".into()),
                "VIFE 0x{reserved:02X}"
            );
        }
    }
}
