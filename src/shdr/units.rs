//! Native-unit to MTConnect-unit conversion.
//!
//! Adapters may report in device-native units; when `convert_units` is set
//! the decoder normalizes sample values through this static factor table.

use once_cell::sync::Lazy;
use std::collections::HashMap;

struct Conversion {
    factor: f64,
    offset: f64,
}

static CONVERSIONS: Lazy<HashMap<&'static str, Conversion>> = Lazy::new(|| {
    let mut table = HashMap::new();
    table.insert(
        "FAHRENHEIT",
        Conversion {
            factor: 5.0 / 9.0,
            offset: -32.0 * 5.0 / 9.0,
        },
    );
    table.insert(
        "INCH",
        Conversion {
            factor: 25.4,
            offset: 0.0,
        },
    );
    table.insert(
        "INCH/MINUTE",
        Conversion {
            factor: 25.4,
            offset: 0.0,
        },
    );
    table.insert(
        "FOOT",
        Conversion {
            factor: 304.8,
            offset: 0.0,
        },
    );
    table.insert(
        "POUND",
        Conversion {
            factor: 0.453_592_37,
            offset: 0.0,
        },
    );
    table.insert(
        "RADIAN",
        Conversion {
            factor: 57.295_779_513_082_32,
            offset: 0.0,
        },
    );
    table.insert(
        "KILOPASCAL",
        Conversion {
            factor: 1000.0,
            offset: 0.0,
        },
    );
    table
});

/// Convert a native-unit value to MTConnect units. Returns `None` when no
/// conversion is defined, in which case the value passes through unchanged.
pub fn convert_native_units(native_units: &str, value: f64) -> Option<f64> {
    CONVERSIONS
        .get(native_units.to_ascii_uppercase().as_str())
        .map(|c| value * c.factor + c.offset)
}
