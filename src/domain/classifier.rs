//! Barcode classifier - maps a scanned code to its marketplace
//!
//! Rules are tried in order and the first match wins. There is no
//! "unknown seller" outcome: anything unmatched is rejected.
//!
//! | Seller        | Format                                         |
//! |---------------|------------------------------------------------|
//! | Mercado Livre | exactly 11 digits                              |
//! | Shopee        | `BR` + 12 digits + 1 uppercase letter (15)     |
//! | Amazon        | `AMZB` + 9 digits + 2 lowercase letters (15)   |

use crate::domain::error::DispatchError;
use crate::domain::types::SellerType;
use chrono::{DateTime, Utc};

pub const REJECTION_REASON: &str = "unrecognized barcode format; accepted formats are \
Mercado Livre (11 digits), Shopee (BR + 12 digits + 1 uppercase letter) and \
Amazon (AMZB + 9 digits + 2 lowercase letters)";

/// Outcome of classifying a code
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    Seller(SellerType),
    Rejected { reason: String },
}

impl Classification {
    pub fn seller(&self) -> Option<SellerType> {
        match self {
            Classification::Seller(seller) => Some(*seller),
            Classification::Rejected { .. } => None,
        }
    }
}

/// A raw scan, alive only during classification
#[derive(Debug, Clone)]
pub struct ScanCandidate {
    pub code: String,
    pub scanned_at: DateTime<Utc>,
}

/// A scan with its classification outcome
#[derive(Debug, Clone)]
pub struct ClassifiedScan {
    /// Trimmed code
    pub code: String,
    pub scanned_at: DateTime<Utc>,
    pub classification: Classification,
}

impl ClassifiedScan {
    /// Convert into the seller, or an `InvalidBarcodeFormat` error
    pub fn into_seller(self) -> Result<(String, SellerType), DispatchError> {
        match self.classification {
            Classification::Seller(seller) => Ok((self.code, seller)),
            Classification::Rejected { reason } => {
                Err(DispatchError::InvalidBarcodeFormat { code: self.code, reason })
            }
        }
    }
}

impl ScanCandidate {
    pub fn new(code: impl Into<String>, scanned_at: DateTime<Utc>) -> Self {
        Self { code: code.into(), scanned_at }
    }

    pub fn classify(self) -> ClassifiedScan {
        let code = self.code.trim().to_string();
        let classification = classify(&code);
        ClassifiedScan { code, scanned_at: self.scanned_at, classification }
    }
}

/// Classify a raw code. Pure and deterministic; whitespace is trimmed first.
pub fn classify(code: &str) -> Classification {
    let bytes = code.trim().as_bytes();

    if is_mercado_livre(bytes) {
        Classification::Seller(SellerType::MercadoLivre)
    } else if is_shopee(bytes) {
        Classification::Seller(SellerType::Shopee)
    } else if is_amazon(bytes) {
        Classification::Seller(SellerType::Amazon)
    } else {
        Classification::Rejected { reason: REJECTION_REASON.to_string() }
    }
}

#[inline]
fn all_digits(bytes: &[u8]) -> bool {
    bytes.iter().all(u8::is_ascii_digit)
}

fn is_mercado_livre(bytes: &[u8]) -> bool {
    bytes.len() == 11 && all_digits(bytes)
}

fn is_shopee(bytes: &[u8]) -> bool {
    bytes.len() == 15
        && bytes.starts_with(b"BR")
        && all_digits(&bytes[2..14])
        && bytes[14].is_ascii_uppercase()
}

fn is_amazon(bytes: &[u8]) -> bool {
    bytes.len() == 15
        && bytes.starts_with(b"AMZB")
        && all_digits(&bytes[4..13])
        && bytes[13..].iter().all(u8::is_ascii_lowercase)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_formats() {
        assert_eq!(classify("12345678901"), Classification::Seller(SellerType::MercadoLivre));
        assert_eq!(classify("BR123456789012A"), Classification::Seller(SellerType::Shopee));
        assert_eq!(classify("AMZB123456789ab"), Classification::Seller(SellerType::Amazon));
        assert!(matches!(classify("hello"), Classification::Rejected { .. }));
    }

    #[test]
    fn test_whitespace_is_trimmed() {
        assert_eq!(classify("  12345678901\n"), Classification::Seller(SellerType::MercadoLivre));
        assert_eq!(classify("\tAMZB123456789ab "), Classification::Seller(SellerType::Amazon));
    }

    #[test]
    fn test_near_misses_are_rejected() {
        let rejected = [
            "",
            "1234567890",        // 10 digits
            "123456789012",      // 12 digits
            "1234567890a",       // letter in ML code
            "BR123456789012a",   // lowercase Shopee suffix
            "br123456789012A",   // lowercase prefix
            "BR12345678901AB",   // 11 digits + 2 letters
            "BR1234567890123",   // digit instead of letter
            "AMZB123456789AB",   // uppercase Amazon suffix
            "AMZB12345678abc",   // 8 digits
            "AMZB123456789a",    // 14 chars
            "AMZA123456789ab",   // wrong prefix
            "１２３４５６７８９０１", // full-width digits
        ];
        for code in rejected {
            assert!(
                matches!(classify(code), Classification::Rejected { .. }),
                "expected rejection for {code:?}"
            );
        }
    }

    #[test]
    fn test_rejection_reason_names_all_formats() {
        let Classification::Rejected { reason } = classify("hello") else {
            panic!("expected rejection");
        };
        assert!(reason.contains("Mercado Livre"));
        assert!(reason.contains("Shopee"));
        assert!(reason.contains("Amazon"));
    }

    #[test]
    fn test_classification_is_deterministic() {
        for code in ["12345678901", "BR123456789012A", "AMZB123456789ab", "nope"] {
            assert_eq!(classify(code), classify(code));
        }
    }

    #[test]
    fn test_candidate_into_seller() {
        let scan = ScanCandidate::new(" BR123456789012Z ", Utc::now()).classify();
        let (code, seller) = scan.into_seller().unwrap();
        assert_eq!(code, "BR123456789012Z");
        assert_eq!(seller, SellerType::Shopee);

        let err = ScanCandidate::new("XYZ", Utc::now()).classify().into_seller().unwrap_err();
        assert_eq!(err.code(), "invalidBarcodeFormat");
    }
}
