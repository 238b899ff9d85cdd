//! SMS PDU codec (3GPP TS 23.040 / 23.038).
//!
//! Decodes the SMS-DELIVER PDUs the modem pushes after `+CMT` and encodes
//! SMS-SUBMIT PDUs for `AT+CMGS`. Text that fits the GSM 7-bit default
//! alphabet is sent as such; anything else goes out as UCS2. Long texts are
//! split into concatenated segments with an 8-bit reference.

use std::sync::atomic::{AtomicU8, Ordering};
use thiserror::Error;

/// GSM 7-bit default alphabet. Position 0x1B is the escape to the extension table.
const GSM_BASIC: &str = "@£$¥èéùìòÇ\nØø\rÅåΔ_ΦΓΛΩΠΨΣΘΞ\u{1b}ÆæßÉ !\"#¤%&'()*+,-./0123456789:;<=>?\
¡ABCDEFGHIJKLMNOPQRSTUVWXYZÄÖÑÜ§¿abcdefghijklmnopqrstuvwxyzäöñüà";

const GSM_ESCAPE: u8 = 0x1b;

/// Extension table reached through [`GSM_ESCAPE`].
const GSM_EXTENSION: &[(u8, char)] = &[
    (0x0a, '\u{0c}'),
    (0x14, '^'),
    (0x28, '{'),
    (0x29, '}'),
    (0x2f, '\\'),
    (0x3c, '['),
    (0x3d, '~'),
    (0x3e, ']'),
    (0x40, '|'),
    (0x65, '€'),
];

const SEPTETS_SINGLE: usize = 160;
const SEPTETS_CONCAT: usize = 153;
const UCS2_UNITS_SINGLE: usize = 70;
const UCS2_UNITS_CONCAT: usize = 67;

const TOA_INTERNATIONAL: u8 = 0x91;
const TOA_UNKNOWN: u8 = 0x81;
/// TP-DA holds at most 10 octets of semi-octet digits.
const MAX_ADDRESS_DIGITS: usize = 20;
const TON_MASK: u8 = 0x70;
const TON_INTERNATIONAL: u8 = 0x10;
const TON_ALPHANUMERIC: u8 = 0x50;

const MTI_DELIVER: u8 = 0x00;
const MTI_SUBMIT: u8 = 0x01;
const FO_UDHI: u8 = 0x40;

/// PDU codec failures.
#[derive(Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum PduError {
    /// Input is not valid hex.
    #[error("invalid hex: {0}")]
    InvalidHex(String),
    /// Input ended before the named field.
    #[error("PDU truncated at {0}")]
    Truncated(&'static str),
    /// Not an SMS-DELIVER (status reports, submit echoes, ...).
    #[error("unsupported message type indicator {0}")]
    UnsupportedMessageType(u8),
    /// Reserved data coding scheme.
    #[error("unsupported data coding scheme 0x{0:02X}")]
    UnsupportedCoding(u8),
    /// Destination number contains non-dialable characters.
    #[error("invalid destination number {0:?}")]
    InvalidNumber(String),
    /// Text needs more than 255 concatenated segments.
    #[error("text too long: {0} segments")]
    TooLong(usize),
}

/// A received text message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sms {
    /// Originating address, `+` prefixed when international.
    pub sender: String,
    /// Decoded message text (this segment only for concatenated messages).
    pub text: String,
    /// Service centre timestamp as `yy/MM/dd,hh:mm:ss`.
    pub timestamp: String,
}

/// One encoded SMS-SUBMIT, ready for `AT+CMGS`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitPdu {
    /// Full PDU including the leading SMSC length octet.
    pub bytes: Vec<u8>,
    /// TPDU length (excluding the SMSC part), the `AT+CMGS=<length>` argument.
    pub tpdu_length: usize,
}

impl SubmitPdu {
    /// Upper-case hex as sent to the modem.
    pub fn to_hex(&self) -> String {
        hex::encode_upper(&self.bytes)
    }
}

/// Converts between PDUs and `(sender, text)` pairs.
pub trait SmsCodec: Send + Sync {
    /// Decode an SMS-DELIVER PDU given as hex.
    fn decode(&self, pdu: &str) -> Result<Sms, PduError>;

    /// Encode `text` to `number` as one or more SMS-SUBMIT PDUs.
    fn encode(&self, number: &str, text: &str) -> Result<Vec<SubmitPdu>, PduError>;
}

/// GSM 03.40 codec using the modem's stored SMSC.
#[derive(Debug, Default)]
pub struct PduCodec {
    next_reference: AtomicU8,
}

impl PduCodec {
    /// New codec; concatenation references start at 0.
    pub fn new() -> Self {
        Self::default()
    }
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn byte(&mut self, field: &'static str) -> Result<u8, PduError> {
        let b = *self
            .data
            .get(self.pos)
            .ok_or(PduError::Truncated(field))?;
        self.pos += 1;
        Ok(b)
    }

    fn take(&mut self, n: usize, field: &'static str) -> Result<&'a [u8], PduError> {
        let end = self.pos + n;
        let slice = self
            .data
            .get(self.pos..end)
            .ok_or(PduError::Truncated(field))?;
        self.pos = end;
        Ok(slice)
    }

    fn rest(&self) -> &'a [u8] {
        &self.data[self.pos.min(self.data.len())..]
    }
}

fn gsm_char(code: u8) -> char {
    GSM_BASIC
        .chars()
        .nth(code as usize)
        .unwrap_or('?')
}

fn gsm_extension_char(code: u8) -> char {
    GSM_EXTENSION
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, ch)| *ch)
        .unwrap_or(' ')
}

/// Septets for `c`, or None if it is outside the GSM alphabet.
fn gsm_septets(c: char) -> Option<Vec<u8>> {
    if c != '\u{1b}' {
        if let Some(pos) = GSM_BASIC
            .chars()
            .position(|g| g == c)
        {
            return Some(vec![pos as u8]);
        }
    }
    GSM_EXTENSION
        .iter()
        .find(|(_, ch)| *ch == c)
        .map(|(code, _)| vec![GSM_ESCAPE, *code])
}

fn decode_gsm(septets: &[u8]) -> String {
    let mut text = String::with_capacity(septets.len());
    let mut iter = septets.iter();
    while let Some(&s) = iter.next() {
        if s == GSM_ESCAPE {
            if let Some(&ext) = iter.next() {
                text.push(gsm_extension_char(ext));
            }
        } else {
            text.push(gsm_char(s));
        }
    }
    text
}

fn pack_septets(septets: &[u8]) -> Vec<u8> {
    let mut out = vec![0u8; (septets.len() * 7 + 7) / 8];
    for (i, &s) in septets
        .iter()
        .enumerate()
    {
        let bit = i * 7;
        let value = u16::from(s & 0x7f) << (bit % 8);
        out[bit / 8] |= value as u8;
        if bit % 8 > 1 {
            out[bit / 8 + 1] |= (value >> 8) as u8;
        }
    }
    out
}

fn unpack_septets(data: &[u8], count: usize) -> Vec<u8> {
    (0..count)
        .map(|i| {
            let bit = i * 7;
            let shift = bit % 8;
            let mut value = u16::from(
                data.get(bit / 8)
                    .copied()
                    .unwrap_or(0),
            ) >> shift;
            if shift > 1 {
                value |= u16::from(
                    data.get(bit / 8 + 1)
                        .copied()
                        .unwrap_or(0),
                ) << (8 - shift);
            }
            (value & 0x7f) as u8
        })
        .collect()
}

/// Swapped-nibble BCD digits, stopping at the `F` filler.
fn decode_semi_octets(data: &[u8], digits: usize) -> String {
    data.iter()
        .flat_map(|b| [b & 0x0f, b >> 4])
        .take(digits)
        .filter_map(|n| match n {
            0..=9 => Some((b'0' + n) as char),
            0x0a => Some('*'),
            0x0b => Some('#'),
            0x0c => Some('a'),
            0x0d => Some('b'),
            0x0e => Some('c'),
            _ => None,
        })
        .collect()
}

fn decode_address(cursor: &mut Cursor<'_>) -> Result<String, PduError> {
    let digits = cursor.byte("address length")? as usize;
    let toa = cursor.byte("address type")?;
    let raw = cursor.take(digits.div_ceil(2), "address")?;
    match toa & TON_MASK {
        TON_ALPHANUMERIC => Ok(decode_gsm(&unpack_septets(raw, digits * 4 / 7))),
        TON_INTERNATIONAL => Ok(format!("+{}", decode_semi_octets(raw, digits))),
        _ => Ok(decode_semi_octets(raw, digits)),
    }
}

fn encode_address(number: &str) -> Result<Vec<u8>, PduError> {
    let (toa, digits) = match number.strip_prefix('+') {
        Some(rest) => (TOA_INTERNATIONAL, rest),
        None => (TOA_UNKNOWN, number),
    };
    let nibbles = digits
        .chars()
        .map(|c| match c {
            '0'..='9' => Ok(c as u8 - b'0'),
            '*' => Ok(0x0a),
            '#' => Ok(0x0b),
            _ => Err(PduError::InvalidNumber(number.to_string())),
        })
        .collect::<Result<Vec<u8>, _>>()?;
    if nibbles.is_empty() || nibbles.len() > MAX_ADDRESS_DIGITS {
        return Err(PduError::InvalidNumber(number.to_string()));
    }

    let mut out = vec![nibbles.len() as u8, toa];
    out.extend(
        nibbles
            .chunks(2)
            .map(|pair| pair[0] | (pair.get(1).copied().unwrap_or(0x0f) << 4)),
    );
    Ok(out)
}

fn decode_timestamp(raw: &[u8]) -> String {
    let d = decode_semi_octets(raw, 12);
    if d.len() < 12 {
        return d;
    }
    format!(
        "{}/{}/{},{}:{}:{}",
        &d[0..2],
        &d[2..4],
        &d[4..6],
        &d[6..8],
        &d[8..10],
        &d[10..12]
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Alphabet {
    Gsm7,
    Data8,
    Ucs2,
}

fn alphabet(dcs: u8) -> Result<Alphabet, PduError> {
    let coding = match dcs & 0xf0 {
        // general data coding, with or without compression/class bits
        0x00..=0x30 => (dcs >> 2) & 0x03,
        // automatic deletion group
        0x40..=0x70 => (dcs >> 2) & 0x03,
        // message waiting indication: discard/store GSM, store UCS2
        0xc0 | 0xd0 => 0,
        0xe0 => 2,
        // data coding / message class
        0xf0 => (dcs >> 2) & 0x01,
        _ => return Err(PduError::UnsupportedCoding(dcs)),
    };
    match coding {
        0 => Ok(Alphabet::Gsm7),
        1 => Ok(Alphabet::Data8),
        2 => Ok(Alphabet::Ucs2),
        _ => Err(PduError::UnsupportedCoding(dcs)),
    }
}

/// Split `text` into GSM septet segments, never separating an escape pair.
fn gsm_segments(text: &str) -> Option<Vec<Vec<u8>>> {
    let chars = text
        .chars()
        .map(gsm_septets)
        .collect::<Option<Vec<_>>>()?;
    let total: usize = chars
        .iter()
        .map(Vec::len)
        .sum();
    if total <= SEPTETS_SINGLE {
        return Some(vec![chars.concat()]);
    }

    let mut segments = Vec::new();
    let mut current: Vec<u8> = Vec::new();
    for septets in chars {
        if current.len() + septets.len() > SEPTETS_CONCAT {
            segments.push(std::mem::take(&mut current));
        }
        current.extend(septets);
    }
    segments.push(current);
    Some(segments)
}

/// Split `text` into UTF-16 segments, never separating a surrogate pair.
fn ucs2_segments(text: &str) -> Vec<Vec<u16>> {
    let total = text
        .encode_utf16()
        .count();
    if total <= UCS2_UNITS_SINGLE {
        return vec![text
            .encode_utf16()
            .collect()];
    }

    let mut segments = Vec::new();
    let mut current: Vec<u16> = Vec::new();
    let mut buf = [0u16; 2];
    for c in text.chars() {
        let units = c.encode_utf16(&mut buf);
        if current.len() + units.len() > UCS2_UNITS_CONCAT {
            segments.push(std::mem::take(&mut current));
        }
        current.extend_from_slice(units);
    }
    segments.push(current);
    segments
}

fn submit_pdu(
    address: &[u8],
    dcs: u8,
    udh: Option<[u8; 6]>,
    udl: usize,
    user_data: &[u8],
) -> SubmitPdu {
    let fo = MTI_SUBMIT | if udh.is_some() { FO_UDHI } else { 0 };
    let mut bytes = vec![
        0x00, // use the SMSC stored in the modem
        fo,
        0x00, // message reference, assigned by the modem
    ];
    bytes.extend_from_slice(address);
    bytes.push(0x00); // PID
    bytes.push(dcs);
    bytes.push(udl as u8);
    bytes.extend_from_slice(user_data);
    let tpdu_length = bytes.len() - 1;
    SubmitPdu { bytes, tpdu_length }
}

fn concat_header(reference: u8, total: usize, seq: usize) -> [u8; 6] {
    [0x05, 0x00, 0x03, reference, total as u8, seq as u8]
}

impl SmsCodec for PduCodec {
    fn decode(&self, pdu: &str) -> Result<Sms, PduError> {
        let data = hex::decode(pdu.trim()).map_err(|e| PduError::InvalidHex(e.to_string()))?;
        let mut cursor = Cursor {
            data: &data,
            pos: 0,
        };

        let smsc_len = cursor.byte("SMSC length")? as usize;
        cursor.take(smsc_len, "SMSC")?;

        let fo = cursor.byte("first octet")?;
        let mti = fo & 0x03;
        if mti != MTI_DELIVER {
            return Err(PduError::UnsupportedMessageType(mti));
        }

        let sender = decode_address(&mut cursor)?;
        cursor.byte("PID")?;
        let dcs = cursor.byte("DCS")?;
        let timestamp = decode_timestamp(cursor.take(7, "SCTS")?);
        let udl = cursor.byte("UDL")? as usize;
        let ud = cursor.rest();

        let udh_octets = if fo & FO_UDHI != 0 {
            let udhl = *ud
                .first()
                .ok_or(PduError::Truncated("UDH"))? as usize;
            udhl + 1
        } else {
            0
        };

        let text = match alphabet(dcs)? {
            Alphabet::Gsm7 => {
                let skip = (udh_octets * 8).div_ceil(7);
                let septets = unpack_septets(ud, udl);
                decode_gsm(septets.get(skip..).unwrap_or_default())
            }
            Alphabet::Data8 => ud
                .get(udh_octets..udl.min(ud.len()))
                .unwrap_or_default()
                .iter()
                .map(|&b| b as char)
                .collect(),
            Alphabet::Ucs2 => {
                let units: Vec<u16> = ud
                    .get(udh_octets..udl.min(ud.len()))
                    .unwrap_or_default()
                    .chunks_exact(2)
                    .map(|p| u16::from_be_bytes([p[0], p[1]]))
                    .collect();
                String::from_utf16_lossy(&units)
            }
        };

        Ok(Sms {
            sender,
            text,
            timestamp,
        })
    }

    fn encode(&self, number: &str, text: &str) -> Result<Vec<SubmitPdu>, PduError> {
        let address = encode_address(number)?;

        if let Some(segments) = gsm_segments(text) {
            let total = segments.len();
            if total > u8::MAX as usize {
                return Err(PduError::TooLong(total));
            }
            if total == 1 {
                let septets = &segments[0];
                return Ok(vec![submit_pdu(
                    &address,
                    0x00,
                    None,
                    septets.len(),
                    &pack_septets(septets),
                )]);
            }

            let reference = self
                .next_reference
                .fetch_add(1, Ordering::Relaxed);
            // 6 header octets occupy 7 septets including the fill bit
            let header_septets = 7;
            return Ok(segments
                .iter()
                .enumerate()
                .map(|(i, septets)| {
                    let udh = concat_header(reference, total, i + 1);
                    let mut padded = vec![0u8; header_septets];
                    padded.extend_from_slice(septets);
                    let mut ud = pack_septets(&padded);
                    ud[..udh.len()].copy_from_slice(&udh);
                    submit_pdu(&address, 0x00, Some(udh), padded.len(), &ud)
                })
                .collect());
        }

        let segments = ucs2_segments(text);
        let total = segments.len();
        if total > u8::MAX as usize {
            return Err(PduError::TooLong(total));
        }
        let reference = (total > 1).then(|| {
            self.next_reference
                .fetch_add(1, Ordering::Relaxed)
        });
        Ok(segments
            .iter()
            .enumerate()
            .map(|(i, units)| {
                let body: Vec<u8> = units
                    .iter()
                    .flat_map(|u| u.to_be_bytes())
                    .collect();
                match reference {
                    Some(r) => {
                        let udh = concat_header(r, total, i + 1);
                        let ud = [&udh[..], &body[..]].concat();
                        submit_pdu(&address, 0x08, Some(udh), ud.len(), &ud)
                    }
                    None => submit_pdu(&address, 0x08, None, body.len(), &body),
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alphabet_table_size() {
        assert_eq!(
            GSM_BASIC
                .chars()
                .count(),
            128
        );
        assert_eq!(gsm_char(0x00), '@');
        assert_eq!(gsm_char(0x41), 'A');
        assert_eq!(gsm_char(0x7f), 'à');
    }

    #[test]
    fn test_decode_deliver_international() {
        let sms = PduCodec::new()
            .decode("07911326040000F0040B911346610089F60000208062917314080CC8F71D14969741F977FD07")
            .unwrap();
        assert_eq!(sms.sender, "+31641600986");
        assert_eq!(sms.text, "How are you?");
        assert_eq!(sms.timestamp, "02/08/26,19:37:41");
    }

    #[test]
    fn test_decode_alphanumeric_sender() {
        let sms = PduCodec::new()
            .decode("000408D0D4F29C0E0000208062917314080CC8F71D14969741F977FD07")
            .unwrap();
        assert_eq!(sms.sender, "Test");
        assert_eq!(sms.text, "How are you?");
    }

    #[test]
    fn test_decode_ucs2() {
        let sms = PduCodec::new()
            .decode("00040A91947110325400082080629173140804 04110442".replace(' ', "").as_str())
            .unwrap();
        assert_eq!(sms.sender, "+4917012345");
        assert_eq!(sms.text, "Бт");
    }

    #[test]
    fn test_decode_rejects_bad_input() {
        let codec = PduCodec::new();
        assert!(matches!(
            codec.decode("zz"),
            Err(PduError::InvalidHex(_))
        ));
        assert!(matches!(
            codec.decode("0004"),
            Err(PduError::Truncated(_))
        ));
        // SMS-STATUS-REPORT
        assert_eq!(
            codec.decode("0006"),
            Err(PduError::UnsupportedMessageType(2))
        );
    }

    #[test]
    fn test_encode_single_gsm() {
        let pdus = PduCodec::new()
            .encode("+4917012345", "hellohello")
            .unwrap();
        assert_eq!(pdus.len(), 1);
        assert_eq!(pdus[0].to_hex(), "0001000A91947110325400000AE8329BFD4697D9EC37");
        assert_eq!(pdus[0].tpdu_length, 21);
    }

    #[test]
    fn test_encode_national_number_odd_digits() {
        let pdus = PduCodec::new()
            .encode("12345", "a")
            .unwrap();
        // length 5, unknown TON, 21 43 F5
        assert_eq!(&pdus[0].bytes[3..8], &[0x05, 0x81, 0x21, 0x43, 0xf5]);
    }

    #[test]
    fn test_encode_extension_chars_count_double() {
        let pdus = PduCodec::new()
            .encode("123", "[€]")
            .unwrap();
        // SMSC, FO, MR, DA (2 + 2), PID, DCS, then UDL
        assert_eq!(pdus[0].bytes[9], 6);
        assert_eq!(pdus[0].bytes.len(), 10 + 6);
    }

    #[test]
    fn test_encode_concatenated_gsm() {
        let text = "a".repeat(200);
        let pdus = PduCodec::new()
            .encode("123", &text)
            .unwrap();
        assert_eq!(pdus.len(), 2);
        for (i, pdu) in pdus
            .iter()
            .enumerate()
        {
            assert_eq!(pdu.bytes[1], MTI_SUBMIT | FO_UDHI);
            let udl = pdu.bytes[9] as usize;
            let ud = &pdu.bytes[10..];
            assert_eq!(&ud[..5], &[0x05, 0x00, 0x03, 0x00, 0x02]);
            assert_eq!(ud[5], (i + 1) as u8);
            let septets = unpack_septets(ud, udl);
            assert!(septets[7..]
                .iter()
                .all(|&s| s == 0x61));
        }
        assert_eq!(pdus[0].bytes[9] as usize, 7 + 153);
        assert_eq!(pdus[1].bytes[9] as usize, 7 + 47);
    }

    #[test]
    fn test_encode_ucs2_fallback() {
        let pdus = PduCodec::new()
            .encode("123", "Привет")
            .unwrap();
        assert_eq!(pdus.len(), 1);
        let bytes = &pdus[0].bytes;
        assert_eq!(bytes[8], 0x08);
        assert_eq!(bytes[9], 12);
        assert_eq!(&bytes[10..12], &[0x04, 0x1f]);
    }

    #[test]
    fn test_encode_concat_references_advance() {
        let codec = PduCodec::new();
        let text = "ж".repeat(80);
        let first = codec
            .encode("123", &text)
            .unwrap();
        let second = codec
            .encode("123", &text)
            .unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first[1].bytes[9], 6 + 13 * 2);
        assert_eq!(first[0].bytes[13], 0);
        assert_eq!(second[0].bytes[13], 1);
    }

    #[test]
    fn test_encode_rejects_bad_number() {
        assert_eq!(
            PduCodec::new().encode("12ab", "x"),
            Err(PduError::InvalidNumber("12ab".into()))
        );
        assert!(PduCodec::new()
            .encode("+", "x")
            .is_err());
    }

    #[test]
    fn test_encode_rejects_overlong_number() {
        let longest = "1".repeat(20);
        assert!(PduCodec::new()
            .encode(&longest, "x")
            .is_ok());
        let too_long = format!("+{}", "1".repeat(21));
        assert_eq!(
            PduCodec::new().encode(&too_long, "x"),
            Err(PduError::InvalidNumber(too_long.clone()))
        );
        let wraps = "9".repeat(256);
        assert!(matches!(
            PduCodec::new().encode(&wraps, "x"),
            Err(PduError::InvalidNumber(_))
        ));
    }

    #[test]
    fn test_septet_packing_matches_reference() {
        let septets: Vec<u8> = "hellohello"
            .chars()
            .map(|c| gsm_septets(c).unwrap()[0])
            .collect();
        let packed = pack_septets(&septets);
        assert_eq!(hex::encode_upper(&packed), "E8329BFD4697D9EC37");
        assert_eq!(unpack_septets(&packed, septets.len()), septets);
    }
}
