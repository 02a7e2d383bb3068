//! Allocation engine
//!
//! Turns a receipt plus its item assignments into what each person owes.
//! Shared items split evenly among their assignees; service charge and GST
//! follow each person's share of the covered subtotal.
//!
//! Pure function of its inputs. No rounding happens here.

use bigdecimal::{BigDecimal, Zero};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use tracing::debug;

use crate::error::SplitError;
use crate::models::{Person, ReceiptData};
use crate::Result;

/// One item's contribution to one person
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ItemShare {
    pub item_id: String,
    pub item_name: String,
    pub split_ways: usize,
    pub amount: BigDecimal,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PersonShare {
    pub person_id: String,
    pub name: String,
    pub subtotal_share: BigDecimal,
    pub service_charge_share: BigDecimal,
    pub gst_share: BigDecimal,
    pub total_owed: BigDecimal,
    pub items: Vec<ItemShare>,
}

/// Per-person breakdown, in roster order.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Allocation {
    pub shares: Vec<PersonShare>,
    /// Sum of everyone's subtotal share
    pub covered_subtotal: BigDecimal,
    /// Price of items nobody is assigned to
    pub unassigned_subtotal: BigDecimal,
    pub unassigned_item_ids: Vec<String>,
}

impl Allocation {
    pub fn share_for(&self, person_id: &str) -> Option<&PersonShare> {
        self.shares.iter().find(|s| s.person_id == person_id)
    }

    /// person id → total owed
    pub fn owed_by_person(&self) -> HashMap<String, BigDecimal> {
        self.shares
            .iter()
            .map(|s| (s.person_id.clone(), s.total_owed.clone()))
            .collect()
    }

    /// Sum of everyone's total owed
    pub fn total_allocated(&self) -> BigDecimal {
        self.shares.iter().map(|s| &s.total_owed).sum()
    }

    pub fn has_unassigned(&self) -> bool {
        !self.unassigned_item_ids.is_empty()
    }
}

/// Compute each person's share of the receipt.
///
/// Fails with `InvalidReceiptState` on negative amounts, on assignments naming
/// someone outside `people`, or on an item listing the same person twice.
pub fn allocate(receipt: &ReceiptData, people: &[Person]) -> Result<Allocation> {
    validate(receipt, people)?;

    let mut subtotals: HashMap<&str, BigDecimal> = people
        .iter()
        .map(|p| (p.id.as_str(), BigDecimal::zero()))
        .collect();
    let mut item_shares: HashMap<&str, Vec<ItemShare>> = HashMap::new();
    let mut unassigned_subtotal = BigDecimal::zero();
    let mut unassigned_item_ids = Vec::new();

    for item in &receipt.items {
        let ways = item.assigned_to.len();
        if ways == 0 {
            unassigned_subtotal += &item.price;
            unassigned_item_ids.push(item.id.clone());
            continue;
        }

        let portion = &item.price / BigDecimal::from(ways as u64);

        for person_id in &item.assigned_to {
            if let Some(subtotal) = subtotals.get_mut(person_id.as_str()) {
                *subtotal += &portion;
            }
            item_shares
                .entry(person_id.as_str())
                .or_default()
                .push(ItemShare {
                    item_id: item.id.clone(),
                    item_name: item.name.clone(),
                    split_ways: ways,
                    amount: portion.clone(),
                });
        }
    }

    let covered_subtotal: BigDecimal = subtotals.values().sum();

    let shares = people
        .iter()
        .map(|person| {
            let subtotal_share = subtotals
                .remove(person.id.as_str())
                .unwrap_or_else(BigDecimal::zero);

            let service_charge_share =
                proportional(&subtotal_share, &covered_subtotal, &receipt.service_charge);
            let gst_share = proportional(&subtotal_share, &covered_subtotal, &receipt.gst);
            let total_owed = &subtotal_share + &service_charge_share + &gst_share;

            PersonShare {
                person_id: person.id.clone(),
                name: person.name.clone(),
                subtotal_share,
                service_charge_share,
                gst_share,
                total_owed,
                items: item_shares.remove(person.id.as_str()).unwrap_or_default(),
            }
        })
        .collect();

    debug!(
        covered = %covered_subtotal,
        unassigned = %unassigned_subtotal,
        people = people.len(),
        "Allocation computed"
    );

    Ok(Allocation {
        shares,
        covered_subtotal,
        unassigned_subtotal,
        unassigned_item_ids,
    })
}

/// `part / whole * amount`, zero when nothing is covered
fn proportional(part: &BigDecimal, whole: &BigDecimal, amount: &BigDecimal) -> BigDecimal {
    if whole.is_zero() {
        return BigDecimal::zero();
    }
    (part * amount) / whole
}

fn validate(receipt: &ReceiptData, people: &[Person]) -> Result<()> {
    let zero = BigDecimal::zero();

    if receipt.service_charge < zero {
        return Err(SplitError::InvalidReceiptState(
            "service charge is negative".to_string(),
        ));
    }
    if receipt.gst < zero {
        return Err(SplitError::InvalidReceiptState("GST is negative".to_string()));
    }

    let roster: HashSet<&str> = people.iter().map(|p| p.id.as_str()).collect();

    for item in &receipt.items {
        if item.price < zero {
            return Err(SplitError::InvalidReceiptState(format!(
                "item '{}' has negative price {}",
                item.id, item.price
            )));
        }

        let mut seen = HashSet::with_capacity(item.assigned_to.len());
        for person_id in &item.assigned_to {
            if !roster.contains(person_id.as_str()) {
                return Err(SplitError::InvalidReceiptState(format!(
                    "item '{}' is assigned to unknown person '{}'",
                    item.id, person_id
                )));
            }
            if !seen.insert(person_id.as_str()) {
                return Err(SplitError::InvalidReceiptState(format!(
                    "item '{}' lists person '{}' twice",
                    item.id, person_id
                )));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{default_roster, ReceiptItem};
    use crate::money::round_cents;
    use std::str::FromStr;

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    fn item(id: &str, price: &str, assigned: &[&str]) -> ReceiptItem {
        let mut item = ReceiptItem::new(id, id, dec(price));
        item.assigned_to = assigned.iter().map(|s| s.to_string()).collect();
        item
    }

    fn receipt(items: Vec<ReceiptItem>, service: &str, gst: &str) -> ReceiptData {
        let subtotal: BigDecimal = items.iter().map(|i| &i.price).sum();
        let total = &subtotal + dec(service) + dec(gst);
        ReceiptData {
            merchant_name: "Test Kopitiam".to_string(),
            date: "2024-05-01".to_string(),
            items,
            subtotal,
            service_charge: dec(service),
            gst: dec(gst),
            total,
        }
    }

    fn me_alice_bob() -> Vec<Person> {
        default_roster().into_iter().take(3).collect()
    }

    #[test]
    fn test_coffee_and_cake_scenario() {
        let receipt = receipt(
            vec![
                item("coffee", "10.00", &["p2", "p3"]),
                item("cake", "6.00", &["p2"]),
            ],
            "1.60",
            "1.44",
        );

        let allocation = allocate(&receipt, &me_alice_bob()).unwrap();

        let alice = allocation.share_for("p2").unwrap();
        assert_eq!(alice.subtotal_share, dec("11"));
        assert_eq!(alice.gst_share, dec("0.99"));
        assert_eq!(alice.service_charge_share, dec("1.10"));
        assert_eq!(alice.total_owed, dec("13.09"));

        let bob = allocation.share_for("p3").unwrap();
        assert_eq!(bob.subtotal_share, dec("5"));
        assert_eq!(bob.gst_share, dec("0.45"));
        assert_eq!(bob.service_charge_share, dec("0.50"));
        assert_eq!(bob.total_owed, dec("5.95"));

        let me = allocation.share_for("p1").unwrap();
        assert!(me.total_owed.is_zero());
        assert!(me.items.is_empty());

        assert_eq!(allocation.covered_subtotal, dec("16"));
        assert!(!allocation.has_unassigned());
    }

    #[test]
    fn test_bob_removed_from_coffee_moves_cost_to_alice() {
        let receipt = receipt(
            vec![
                item("coffee", "10.00", &["p2"]),
                item("cake", "6.00", &["p2"]),
            ],
            "1.60",
            "1.44",
        );

        let allocation = allocate(&receipt, &me_alice_bob()).unwrap();
        assert_eq!(allocation.share_for("p2").unwrap().total_owed, dec("19.04"));
        assert!(allocation.share_for("p3").unwrap().total_owed.is_zero());
    }

    #[test]
    fn test_three_way_split_contributes_a_third_each() {
        let receipt = receipt(vec![item("platter", "12.00", &["p1", "p2", "p3"])], "0", "0");

        let allocation = allocate(&receipt, &me_alice_bob()).unwrap();
        for share in &allocation.shares {
            assert_eq!(share.subtotal_share, dec("4"));
            assert_eq!(share.items.len(), 1);
            assert_eq!(share.items[0].split_ways, 3);
        }
    }

    #[test]
    fn test_single_owner_items_sum_to_receipt_within_a_cent_each() {
        let receipt = receipt(
            vec![
                item("laksa", "7.30", &["p1"]),
                item("chicken rice", "5.80", &["p2"]),
                item("teh", "1.90", &["p3"]),
                item("char kway teow", "5.00", &["p2"]),
            ],
            "2.00",
            "1.98",
        );
        let people = me_alice_bob();

        let allocation = allocate(&receipt, &people).unwrap();

        assert_eq!(
            allocation.share_for("p1").unwrap().subtotal_share,
            dec("7.30")
        );

        let exact_sum = allocation.total_allocated();
        let expected = &receipt.subtotal + &receipt.service_charge + &receipt.gst;
        assert_eq!(exact_sum, expected);

        let rounded_sum: BigDecimal = allocation
            .shares
            .iter()
            .map(|s| round_cents(&s.total_owed))
            .sum();
        let drift = (rounded_sum - expected).abs();
        assert!(drift <= dec("0.01") * BigDecimal::from(people.len() as u64));
    }

    #[test]
    fn test_unassigned_items_contribute_nothing() {
        let receipt = receipt(
            vec![
                item("coffee", "10.00", &["p2"]),
                item("mystery", "4.00", &[]),
            ],
            "1.40",
            "1.26",
        );

        let allocation = allocate(&receipt, &me_alice_bob()).unwrap();

        assert_eq!(allocation.covered_subtotal, dec("10"));
        assert_eq!(allocation.unassigned_subtotal, dec("4"));
        assert_eq!(allocation.unassigned_item_ids, vec!["mystery".to_string()]);
        assert!(allocation.covered_subtotal < receipt.subtotal);

        // Alice covers everything assigned, so she carries all of the tax.
        let alice = allocation.share_for("p2").unwrap();
        assert_eq!(alice.total_owed, dec("12.66"));
    }

    #[test]
    fn test_nothing_assigned_means_zero_everywhere() {
        let receipt = receipt(vec![item("coffee", "10.00", &[])], "1.00", "0.99");

        let allocation = allocate(&receipt, &me_alice_bob()).unwrap();
        assert!(allocation.covered_subtotal.is_zero());
        assert!(allocation.shares.iter().all(|s| s.total_owed.is_zero()));
    }

    #[test]
    fn test_unknown_person_is_contract_violation() {
        let receipt = receipt(vec![item("coffee", "10.00", &["p9"])], "0", "0");

        let err = allocate(&receipt, &me_alice_bob()).unwrap_err();
        assert!(matches!(err, SplitError::InvalidReceiptState(_)));
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_negative_price_and_duplicates_rejected() {
        let negative = receipt(vec![item("refund", "-2.00", &["p1"])], "0", "0");
        assert!(allocate(&negative, &me_alice_bob()).is_err());

        let duplicate = receipt(vec![item("coffee", "2.00", &["p1", "p1"])], "0", "0");
        assert!(allocate(&duplicate, &me_alice_bob()).is_err());
    }

    #[test]
    fn test_owed_by_person_map() {
        let receipt = receipt(vec![item("coffee", "9.00", &["p1", "p2"])], "0", "0");
        let owed = allocate(&receipt, &me_alice_bob()).unwrap().owed_by_person();

        assert_eq!(owed.len(), 3);
        assert_eq!(owed["p1"], dec("4.5"));
        assert!(owed["p3"].is_zero());
    }
}
