//! Item barcode layout.
//!
//! ```text
//! 1 12 230501
//! │ │  └── expiry YYMMDD
//! │ └───── item code
//! └─────── zone code (1=A, 2=B, 3=C, 0=E; letters pass through)
//! ```

use serde::{Deserialize, Serialize};
use sortline_core::constants::MIN_BARCODE_LENGTH;
use sortline_core::{Error, Result, Zone};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Barcode {
    pub zone: Zone,
    pub item_code: String,
    /// `YYYY-MM-DD`, century fixed to 20xx.
    pub expiry: String,
}

/// Parse a scanned barcode. Characters past the ninth are ignored.
///
/// An unrecognized zone code routes the item to the error bucket.
///
/// # Errors
/// Returns `Error::Protocol` for input shorter than nine characters or
/// containing non-ASCII characters; no partial record is produced.
///
/// ```
/// use sortline_core::Zone;
/// use sortline_protocol::parse_barcode;
///
/// let barcode = parse_barcode("112230501").unwrap();
/// assert_eq!(barcode.zone, Zone::A);
/// assert_eq!(barcode.item_code, "12");
/// assert_eq!(barcode.expiry, "2023-05-01");
/// ```
pub fn parse_barcode(code: &str) -> Result<Barcode> {
    let code = code.trim();
    if !code.is_ascii() {
        return Err(Error::protocol(format!("barcode is not ASCII: {code:?}")));
    }
    if code.len() < MIN_BARCODE_LENGTH {
        return Err(Error::protocol(format!(
            "barcode needs {MIN_BARCODE_LENGTH} characters, got {}: {code:?}",
            code.len()
        )));
    }

    let zone = code
        .chars()
        .next()
        .and_then(Zone::from_code)
        .unwrap_or(Zone::E);

    Ok(Barcode {
        zone,
        item_code: code[1..3].to_string(),
        expiry: format!("20{}-{}-{}", &code[3..5], &code[5..7], &code[7..9]),
    })
}
