//! Working cart for the order being rung up.
//!
//! Lines merge by menu item, quantities never drop to zero through
//! `update_quantity` (removal is explicit), and totals are derived on
//! demand so the cart can never hold a stale figure.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CheckoutError;
use crate::order::OrderTotals;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DiscountKind {
    #[default]
    Percentage,
    Fixed,
}

impl DiscountKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Percentage => "percentage",
            Self::Fixed => "fixed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Discount {
    pub kind: DiscountKind,
    pub value: f64,
}

impl Discount {
    pub fn percentage(value: f64) -> Self {
        Self {
            kind: DiscountKind::Percentage,
            value,
        }
    }

    pub fn fixed(value: f64) -> Self {
        Self {
            kind: DiscountKind::Fixed,
            value,
        }
    }

    /// Discount amount for a subtotal: never negative, and never more than
    /// the subtotal for a fixed discount.
    pub fn amount_for(&self, subtotal: f64) -> f64 {
        let subtotal = subtotal.max(0.0);
        let amount = match self.kind {
            DiscountKind::Percentage => subtotal * self.value / 100.0,
            DiscountKind::Fixed => self.value.min(subtotal),
        };
        amount.max(0.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartLine {
    pub id: String,
    pub menu_item_id: String,
    pub name: String,
    pub price: f64,
    pub quantity: u32,
}

impl CartLine {
    pub fn line_total(&self) -> f64 {
        self.price * f64::from(self.quantity)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Cart {
    lines: Vec<CartLine>,
    discount: Discount,
}

impl Cart {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> &[CartLine] {
        &self.lines
    }

    pub fn discount(&self) -> Discount {
        self.discount
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Add one unit of a menu item, merging into an existing line.
    /// Returns the line id.
    pub fn add_item(
        &mut self,
        menu_item_id: &str,
        name: &str,
        price: f64,
    ) -> Result<String, CheckoutError> {
        if !price.is_finite() || price < 0.0 {
            return Err(CheckoutError::Validation(format!("Invalid price for {name}")));
        }
        if let Some(line) = self
            .lines
            .iter_mut()
            .find(|l| l.menu_item_id == menu_item_id)
        {
            line.quantity = line.quantity.saturating_add(1);
            return Ok(line.id.clone());
        }
        let id = Uuid::new_v4().to_string();
        self.lines.push(CartLine {
            id: id.clone(),
            menu_item_id: menu_item_id.to_string(),
            name: name.to_string(),
            price,
            quantity: 1,
        });
        Ok(id)
    }

    /// Adjust a line's quantity. Ignored when the result would not stay
    /// positive or the line does not exist.
    pub fn update_quantity(&mut self, line_id: &str, delta: i64) -> bool {
        let Some(line) = self.lines.iter_mut().find(|l| l.id == line_id) else {
            return false;
        };
        let next = i64::from(line.quantity) + delta;
        if next <= 0 || next > i64::from(u32::MAX) {
            return false;
        }
        line.quantity = next as u32;
        true
    }

    pub fn remove_item(&mut self, line_id: &str) -> bool {
        let before = self.lines.len();
        self.lines.retain(|l| l.id != line_id);
        self.lines.len() != before
    }

    /// Empty the cart and reset the discount.
    pub fn clear(&mut self) {
        self.lines.clear();
        self.discount = Discount::default();
    }

    pub fn apply_discount(&mut self, discount: Discount) -> Result<(), CheckoutError> {
        if !discount.value.is_finite() || discount.value < 0.0 {
            return Err(CheckoutError::Validation(
                "Please enter a valid discount value".into(),
            ));
        }
        if discount.kind == DiscountKind::Percentage && discount.value > 100.0 {
            return Err(CheckoutError::Validation(
                "Percentage discount cannot exceed 100%".into(),
            ));
        }
        self.discount = discount;
        Ok(())
    }

    pub fn remove_discount(&mut self) {
        self.discount = Discount::default();
    }

    pub fn subtotal(&self) -> f64 {
        self.lines.iter().map(CartLine::line_total).sum()
    }

    pub fn discount_amount(&self) -> f64 {
        self.discount.amount_for(self.subtotal())
    }

    pub fn total(&self) -> f64 {
        (self.subtotal() - self.discount_amount()).max(0.0)
    }

    pub fn totals(&self) -> OrderTotals {
        let subtotal = self.subtotal();
        let discount_amount = self.discount.amount_for(subtotal);
        OrderTotals {
            subtotal,
            discount_amount,
            total: (subtotal - discount_amount).max(0.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cart_with(items: &[(&str, f64, u32)]) -> Cart {
        let mut cart = Cart::new();
        for (menu_item_id, price, quantity) in items {
            for _ in 0..*quantity {
                cart.add_item(menu_item_id, menu_item_id, *price).unwrap();
            }
        }
        cart
    }

    #[test]
    fn test_add_item_merges_lines() {
        let mut cart = Cart::new();
        let first = cart.add_item("m1", "Souvlaki", 45.0).unwrap();
        let second = cart.add_item("m1", "Souvlaki", 45.0).unwrap();
        cart.add_item("m2", "Fries", 4.5).unwrap();
        assert_eq!(first, second);
        assert_eq!(cart.lines().len(), 2);
        assert_eq!(cart.lines()[0].quantity, 2);
        assert_eq!(cart.subtotal(), 94.5);
    }

    #[test]
    fn test_add_item_rejects_bad_price() {
        let mut cart = Cart::new();
        assert!(cart.add_item("m1", "Refund", -20.0).unwrap_err().is_validation());
        assert!(cart.add_item("m2", "Broken", f64::NAN).is_err());
        assert!(cart.add_item("m3", "Broken", f64::INFINITY).is_err());
        assert!(cart.is_empty());
        assert!(cart.add_item("m4", "Water", 0.0).is_ok());
    }

    #[test]
    fn test_discount_amount_never_negative() {
        assert_eq!(Discount::fixed(5.0).amount_for(-20.0), 0.0);
        assert_eq!(Discount::percentage(10.0).amount_for(-20.0), 0.0);
        assert_eq!(Discount::fixed(5.0).amount_for(0.0), 0.0);
    }

    #[test]
    fn test_update_quantity_never_reaches_zero() {
        let mut cart = Cart::new();
        let id = cart.add_item("m1", "Souvlaki", 10.0).unwrap();
        assert!(cart.update_quantity(&id, 2));
        assert_eq!(cart.lines()[0].quantity, 3);
        assert!(!cart.update_quantity(&id, -3));
        assert_eq!(cart.lines()[0].quantity, 3);
        assert!(!cart.update_quantity("missing", 1));
        assert!(cart.remove_item(&id));
        assert!(cart.is_empty());
    }

    #[test]
    fn test_percentage_discount() {
        let mut cart = cart_with(&[("m1", 45.0, 2)]);
        cart.apply_discount(Discount::percentage(10.0)).unwrap();
        let totals = cart.totals();
        assert_eq!(totals.subtotal, 90.0);
        assert_eq!(totals.discount_amount, 90.0 * 10.0 / 100.0);
        assert_eq!(totals.total, 81.0);
    }

    #[test]
    fn test_fixed_discount_capped_at_subtotal() {
        let mut cart = cart_with(&[("m1", 5.0, 2)]);
        cart.apply_discount(Discount::fixed(25.0)).unwrap();
        assert_eq!(cart.discount_amount(), 10.0);
        assert_eq!(cart.total(), 0.0);

        cart.apply_discount(Discount::fixed(3.0)).unwrap();
        assert_eq!(cart.discount_amount(), 3.0);
        assert_eq!(cart.total(), 7.0);
    }

    #[test]
    fn test_total_never_negative() {
        let mut cart = cart_with(&[("m1", 12.0, 1)]);
        cart.apply_discount(Discount::percentage(100.0)).unwrap();
        assert_eq!(cart.total(), 0.0);
        assert!(Cart::new().total() >= 0.0);
    }

    #[test]
    fn test_discount_validation() {
        let mut cart = cart_with(&[("m1", 12.0, 1)]);
        assert!(cart.apply_discount(Discount::percentage(101.0)).is_err());
        assert!(cart.apply_discount(Discount::fixed(-1.0)).is_err());
        assert!(cart.apply_discount(Discount::fixed(f64::NAN)).is_err());
        assert!(cart.apply_discount(Discount::fixed(150.0)).is_ok());
        cart.remove_discount();
        assert_eq!(cart.discount(), Discount::default());
    }

    #[test]
    fn test_clear_resets_discount() {
        let mut cart = cart_with(&[("m1", 12.0, 1)]);
        cart.apply_discount(Discount::fixed(2.0)).unwrap();
        cart.clear();
        assert!(cart.is_empty());
        assert_eq!(cart.discount(), Discount::percentage(0.0));
    }
}
