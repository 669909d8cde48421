//! # Validation Module
//!
//! Input validation for the ledger's write operations.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: Billing UI                                                    │
//! │  └── Immediate user feedback                                           │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: Repository call (Rust)                                       │
//! │  └── THIS MODULE: runs before BEGIN, so nothing is half-written        │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Database (SQLite)                                            │
//! │  ├── NOT NULL / CHECK constraints                                      │
//! │  └── Foreign key constraints                                           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use crate::error::ValidationError;
use crate::money::Money;
use crate::{MAX_CART_ITEMS, MAX_ITEM_QUANTITY, MAX_PRICE_PAISE};

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Largest page a read query may ask for.
pub const MAX_PAGE_SIZE: u32 = 500;

// =============================================================================
// String Validators
// =============================================================================

/// Validates a required display name (company, customer, product, ...).
///
/// ## Rules
/// - Must not be empty after trimming
/// - At most `max` characters
pub fn validate_name(field: &str, name: &str, max: usize) -> ValidationResult<()> {
    let name = name.trim();

    if name.is_empty() {
        return Err(ValidationError::required(field));
    }

    if name.chars().count() > max {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            max,
        });
    }

    Ok(())
}

/// Validates a company PIN.
///
/// ## Rules
/// - 4 to 6 ASCII digits, nothing else
///
/// ## Example
/// ```rust
/// use till_core::validation::validate_pin;
///
/// assert!(validate_pin("1234").is_ok());
/// assert!(validate_pin("123456").is_ok());
/// assert!(validate_pin("123").is_err());
/// assert!(validate_pin("12a4").is_err());
/// ```
pub fn validate_pin(pin: &str) -> ValidationResult<()> {
    let len_ok = (4..=6).contains(&pin.len());
    if !len_ok || !pin.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ValidationError::invalid_format("pin", "must be 4-6 digits"));
    }

    Ok(())
}

/// Validates a device identifier.
pub fn validate_device_id(device_id: &str) -> ValidationResult<()> {
    if device_id.trim().is_empty() {
        return Err(ValidationError::required("device_id"));
    }

    Ok(())
}

/// Loose email check: one `@` with something on both sides.
pub fn validate_email(email: &str) -> ValidationResult<()> {
    match email.trim().split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(()),
        _ => Err(ValidationError::invalid_format("email", "must look like name@domain")),
    }
}

/// Validates a search query.
///
/// ## Returns
/// The trimmed query string, or `None` when blank.
pub fn validate_search_query(query: &str) -> ValidationResult<Option<String>> {
    let query = query.trim();

    if query.len() > 100 {
        return Err(ValidationError::TooLong {
            field: "query".to_string(),
            max: 100,
        });
    }

    Ok((!query.is_empty()).then(|| query.to_string()))
}

// =============================================================================
// Numeric Validators
// =============================================================================

/// Validates a line quantity.
///
/// ## Rules
/// - Must be positive (> 0)
/// - Must not exceed MAX_ITEM_QUANTITY (999)
pub fn validate_quantity(qty: i64) -> ValidationResult<()> {
    if qty <= 0 {
        return Err(ValidationError::MustBePositive {
            field: "quantity".to_string(),
        });
    }

    if qty > MAX_ITEM_QUANTITY {
        return Err(ValidationError::OutOfRange {
            field: "quantity".to_string(),
            min: 1,
            max: MAX_ITEM_QUANTITY,
        });
    }

    Ok(())
}

/// Validates stock on hand. Zero is fine; negative is not.
pub fn validate_stock(qty: i64) -> ValidationResult<()> {
    if qty < 0 {
        return Err(ValidationError::OutOfRange {
            field: "stock".to_string(),
            min: 0,
            max: i64::MAX,
        });
    }

    Ok(())
}

/// Validates a price. Zero is allowed (free items).
pub fn validate_price(price: Money) -> ValidationResult<()> {
    if price.is_negative() || price.paise() > MAX_PRICE_PAISE {
        return Err(ValidationError::OutOfRange {
            field: "price".to_string(),
            min: 0,
            max: MAX_PRICE_PAISE,
        });
    }

    Ok(())
}

/// Computes `price * quantity` for a cart or invoice line.
///
/// Prices already stored may predate the price cap, so the product is
/// checked rather than trusted.
pub fn line_total(price: Money, quantity: i64) -> ValidationResult<Money> {
    price.checked_mul(quantity).ok_or_else(|| ValidationError::OutOfRange {
        field: "line total".to_string(),
        min: 0,
        max: i64::MAX,
    })
}

/// Validates a payment amount. Must be positive.
pub fn validate_payment_amount(amount: Money) -> ValidationResult<()> {
    if !amount.is_positive() {
        return Err(ValidationError::MustBePositive {
            field: "payment amount".to_string(),
        });
    }

    Ok(())
}

/// Validates a requested page size.
pub fn validate_page_size(limit: u32) -> ValidationResult<()> {
    if limit == 0 || limit > MAX_PAGE_SIZE {
        return Err(ValidationError::OutOfRange {
            field: "limit".to_string(),
            min: 1,
            max: MAX_PAGE_SIZE as i64,
        });
    }

    Ok(())
}

// =============================================================================
// Collection Validators
// =============================================================================

/// Validates that one more line fits in the cart.
///
/// ## Rules
/// - Must not exceed MAX_CART_ITEMS (100)
pub fn validate_cart_size(current_items: usize) -> ValidationResult<()> {
    if current_items >= MAX_CART_ITEMS {
        return Err(ValidationError::OutOfRange {
            field: "cart items".to_string(),
            min: 0,
            max: MAX_CART_ITEMS as i64,
        });
    }

    Ok(())
}

// =============================================================================
// Tax Identifiers
// =============================================================================

/// Validates a GSTIN: 2-digit state code, 10-character PAN, entity number,
/// a literal `Z`, then a check character.
///
/// ## Example
/// ```rust
/// use till_core::validation::validate_gstin;
///
/// assert!(validate_gstin("27AAPFU0939F1ZV").is_ok());
/// assert!(validate_gstin("27aapfu0939f1zv").is_err());
/// ```
pub fn validate_gstin(gstin: &str) -> ValidationResult<()> {
    let bytes = gstin.as_bytes();
    let invalid = || ValidationError::invalid_format("gstin", "must be a 15-character GSTIN");

    if bytes.len() != 15 {
        return Err(invalid());
    }

    let upper_alnum = |b: u8| b.is_ascii_digit() || b.is_ascii_uppercase();
    let well_formed = bytes[0..2].iter().all(u8::is_ascii_digit)
        && bytes[2..7].iter().all(u8::is_ascii_uppercase)
        && bytes[7..11].iter().all(u8::is_ascii_digit)
        && bytes[11].is_ascii_uppercase()
        && upper_alnum(bytes[12])
        && bytes[13] == b'Z'
        && upper_alnum(bytes[14]);

    if !well_formed {
        return Err(invalid());
    }

    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_name() {
        assert!(validate_name("name", "Corner Store", 200).is_ok());
        assert!(validate_name("name", "   ", 200).is_err());
        assert!(validate_name("name", &"A".repeat(201), 200).is_err());
    }

    #[test]
    fn test_validate_pin() {
        assert!(validate_pin("0000").is_ok());
        assert!(validate_pin("12345").is_ok());
        assert!(validate_pin("1234567").is_err());
        assert!(validate_pin("").is_err());
        assert!(validate_pin("12 34").is_err());
        assert!(validate_pin("١٢٣٤").is_err());
    }

    #[test]
    fn test_validate_email() {
        assert!(validate_email("owner@store.in").is_ok());
        assert!(validate_email("owner").is_err());
        assert!(validate_email("@store.in").is_err());
    }

    #[test]
    fn test_validate_search_query() {
        assert_eq!(validate_search_query("  cola ").unwrap(), Some("cola".to_string()));
        assert_eq!(validate_search_query("   ").unwrap(), None);
        assert!(validate_search_query(&"x".repeat(101)).is_err());
    }

    #[test]
    fn test_validate_quantity() {
        assert!(validate_quantity(1).is_ok());
        assert!(validate_quantity(999).is_ok());
        assert!(validate_quantity(0).is_err());
        assert!(validate_quantity(-1).is_err());
        assert!(validate_quantity(1000).is_err());
    }

    #[test]
    fn test_validate_money() {
        assert!(validate_price(Money::zero()).is_ok());
        assert!(validate_price(Money::from_paise(-1)).is_err());
        assert!(validate_price(Money::from_paise(MAX_PRICE_PAISE)).is_ok());
        assert!(matches!(
            validate_price(Money::from_paise(MAX_PRICE_PAISE + 1)),
            Err(ValidationError::OutOfRange { .. })
        ));
        assert!(validate_payment_amount(Money::from_paise(1)).is_ok());
        assert!(validate_payment_amount(Money::zero()).is_err());
    }

    #[test]
    fn test_validate_page_size() {
        assert!(validate_page_size(50).is_ok());
        assert!(validate_page_size(0).is_err());
        assert!(validate_page_size(MAX_PAGE_SIZE + 1).is_err());
    }

    #[test]
    fn test_validate_cart_size() {
        assert!(validate_cart_size(0).is_ok());
        assert!(validate_cart_size(MAX_CART_ITEMS - 1).is_ok());
        assert!(validate_cart_size(MAX_CART_ITEMS).is_err());
    }

    #[test]
    fn test_line_total() {
        assert_eq!(line_total(Money::from_rupees(40), 3).unwrap(), Money::from_rupees(120));

        let err = line_total(Money::from_paise(i64::MAX / 10), 20).unwrap_err();
        assert!(matches!(err, ValidationError::OutOfRange { ref field, .. } if field == "line total"));
    }

    #[test]
    fn test_validate_gstin() {
        assert!(validate_gstin("27AAPFU0939F1ZV").is_ok());
        assert!(validate_gstin("07AAACB2230M1Z3").is_ok());
        assert!(validate_gstin("").is_err());
        assert!(validate_gstin("27AAPFU0939F1Z").is_err());
        assert!(validate_gstin("27AAPFU0939F1XV").is_err());
        assert!(validate_gstin("2XAAPFU0939F1ZV").is_err());
        assert!(validate_gstin("27aapfu0939f1zv").is_err());
    }
}
