//! Numeral validation and conversion between bases 2, 8, 10 and 16.
//!
//! Pure functions with no dependency on configuration, storage or I/O.
//! Values are parsed into `i64`; inputs outside that range are rejected
//! rather than saturated.

use thiserror::Error;

/// The only bases this module accepts.
pub const SUPPORTED_BASES: [u32; 4] = [2, 8, 10, 16];

/// Conversion failures. Never retried, never coerced to a partial result.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RadixError {
  /// Requested base is outside {2, 8, 10, 16}.
  #[error("unsupported base {0}, expected one of 2, 8, 10 or 16")]
  UnsupportedBase(u32),
  /// Input text is not a valid numeral for the stated base.
  #[error("{input:?} is not a valid base-{base} numeral")]
  InvalidInput { input: String, base: u32 },
}

impl RadixError {
  fn invalid(input: &str, base: u32) -> Self {
    RadixError::InvalidInput {
      input: input.to_string(),
      base,
    }
  }
}

/// Check whether `text` is a valid numeral in `base`.
///
/// Leading/trailing whitespace is ignored. An empty (or whitespace-only)
/// string is invalid in every base, as is any unsupported base. Only base 10
/// accepts a single leading `+` or `-`; hex digits are case-insensitive.
pub fn is_valid_for_base(text: &str, base: u32) -> bool {
  let s = text.trim();
  if s.is_empty() {
    return false;
  }
  match base {
    2 => s.chars().all(|c| matches!(c, '0' | '1')),
    8 => s.chars().all(|c| matches!(c, '0'..='7')),
    10 => {
      let digits = s
        .strip_prefix('+')
        .or_else(|| s.strip_prefix('-'))
        .unwrap_or(s);
      !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit())
    }
    16 => s.chars().all(|c| c.is_ascii_hexdigit()),
    _ => false,
  }
}

/// Parse `text` as an integer in `from_base`.
///
/// Fails with `UnsupportedBase` for a base outside the supported set and
/// with `InvalidInput` when validation fails or the value does not fit an
/// `i64`. Never returns a partial result.
pub fn to_decimal(text: &str, from_base: u32) -> Result<i64, RadixError> {
  if !SUPPORTED_BASES.contains(&from_base) {
    return Err(RadixError::UnsupportedBase(from_base));
  }
  if !is_valid_for_base(text, from_base) {
    return Err(RadixError::invalid(text, from_base));
  }
  // Overflow is the only way parsing can still fail after validation.
  i64::from_str_radix(text.trim(), from_base).map_err(|_| RadixError::invalid(text, from_base))
}

/// Convert `text` from `from_base` to its representation in `to_base`.
///
/// Base-10 output is a plain signed decimal string. Other targets render the
/// magnitude in uppercase digits, prefixed with `-` for negative values
/// (which can only originate from base-10 input) and never with `+`.
pub fn convert(text: &str, from_base: u32, to_base: u32) -> Result<String, RadixError> {
  let value = to_decimal(text, from_base)?;

  if to_base == 10 {
    return Ok(value.to_string());
  }
  if !SUPPORTED_BASES.contains(&to_base) {
    return Err(RadixError::UnsupportedBase(to_base));
  }

  let magnitude = value.unsigned_abs();
  let digits = match to_base {
    2 => format!("{:b}", magnitude),
    8 => format!("{:o}", magnitude),
    _ => format!("{:X}", magnitude),
  };

  if value < 0 {
    Ok(format!("-{}", digits))
  } else {
    Ok(digits)
  }
}

/// Method walkthroughs per ordered base pair, shown by `convert --explain`.
///
/// Presentation content only; the converter itself never consults this.
const EXPLANATIONS: &[((u32, u32), &str)] = &[
  (
    (2, 8),
    "Binary to octal: group binary digits into sets of 3 from the right and \
     convert each group to one octal digit.",
  ),
  (
    (2, 10),
    "Binary to decimal: multiply each binary digit by 2 raised to its \
     position (from the right, starting at 0) and sum the results.",
  ),
  (
    (2, 16),
    "Binary to hexadecimal: group binary digits into sets of 4 from the \
     right and convert each group to one hex digit.",
  ),
  (
    (8, 2),
    "Octal to binary: replace each octal digit with its 3-digit binary \
     equivalent.",
  ),
  (
    (8, 10),
    "Octal to decimal: multiply each octal digit by 8 raised to its \
     position (from the right, starting at 0) and sum the results.",
  ),
  (
    (8, 16),
    "Octal to hexadecimal: convert to binary first, then regroup into sets \
     of 4 and convert each group to one hex digit.",
  ),
  (
    (10, 2),
    "Decimal to binary: repeatedly divide by 2 and read the remainders in \
     reverse order.",
  ),
  (
    (10, 8),
    "Decimal to octal: repeatedly divide by 8 and read the remainders in \
     reverse order.",
  ),
  (
    (10, 16),
    "Decimal to hexadecimal: repeatedly divide by 16 and read the \
     remainders (10=A through 15=F) in reverse order.",
  ),
  (
    (16, 2),
    "Hexadecimal to binary: replace each hex digit with its 4-digit binary \
     equivalent.",
  ),
  (
    (16, 8),
    "Hexadecimal to octal: convert to binary first, then regroup into sets \
     of 3 and convert each group to one octal digit.",
  ),
  (
    (16, 10),
    "Hexadecimal to decimal: multiply each hex digit by 16 raised to its \
     position (from the right, starting at 0) and sum the results.",
  ),
];

/// Get the conversion-method walkthrough for an ordered base pair.
///
/// Returns `None` for identical or unsupported pairs.
pub fn explanation(from_base: u32, to_base: u32) -> Option<&'static str> {
  EXPLANATIONS
    .iter()
    .find(|(pair, _)| *pair == (from_base, to_base))
    .map(|(_, text)| *text)
}
