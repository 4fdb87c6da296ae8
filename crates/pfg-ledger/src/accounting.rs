//! FIFO lot mechanics and point-value P&L.
//!
//! Deterministic, pure logic, no IO. All P&L divisions floor toward negative
//! infinity, so a fractional-micro loss rounds to the larger loss and a
//! fractional-micro gain rounds down.

use crate::fixedpoint::{i128_to_i64_clamp, Micros, MICROS_SCALE};
use crate::types::{Lot, PositionState};

/// `price_delta × qty × point_value`, floored.
pub fn pnl_micros(price_delta: Micros, qty: i64, point_value: Micros) -> Micros {
    let prod = price_delta.raw() as i128 * qty as i128 * point_value.raw() as i128;
    Micros::new(i128_to_i64_clamp(prod.div_euclid(MICROS_SCALE as i128)))
}

/// Apply a signed fill to one position with FIFO lots.
///
/// Positive `qty_delta` covers short lots first and opens a long lot with the
/// remainder; negative `qty_delta` reduces long lots first and opens a short
/// lot with the remainder. Returns the realized P&L.
pub fn apply_fill(pos: &mut PositionState, qty_delta: i64, price: Micros, point_value: Micros) -> Micros {
    debug_assert!(qty_delta != 0);
    if qty_delta > 0 {
        buy_fifo(pos, qty_delta, price, point_value)
    } else {
        sell_fifo(pos, -qty_delta, price, point_value)
    }
}

fn buy_fifo(pos: &mut PositionState, mut qty: i64, buy_px: Micros, point_value: Micros) -> Micros {
    let mut realized = Micros::ZERO;
    let mut i = 0usize;
    while qty > 0 && i < pos.lots.len() {
        if !pos.lots[i].is_short() {
            i += 1;
            continue;
        }

        let coverable = pos.lots[i].abs_qty().min(qty);
        let entry_px = pos.lots[i].entry_price;

        // short cover: (entry - buy) * qty
        realized = realized.saturating_add(pnl_micros(entry_px - buy_px, coverable, point_value));

        let remaining_abs = pos.lots[i].abs_qty() - coverable;
        if remaining_abs == 0 {
            pos.lots.remove(i);
        } else {
            pos.lots[i].qty_signed = -remaining_abs;
            i += 1;
        }
        qty -= coverable;
    }

    if qty > 0 {
        pos.lots.push(Lot::long(qty, buy_px));
    }
    realized
}

fn sell_fifo(pos: &mut PositionState, mut qty: i64, sell_px: Micros, point_value: Micros) -> Micros {
    let mut realized = Micros::ZERO;
    let mut i = 0usize;
    while qty > 0 && i < pos.lots.len() {
        if !pos.lots[i].is_long() {
            i += 1;
            continue;
        }

        let sellable = pos.lots[i].abs_qty().min(qty);
        let entry_px = pos.lots[i].entry_price;

        realized = realized.saturating_add(pnl_micros(sell_px - entry_px, sellable, point_value));

        let remaining_abs = pos.lots[i].abs_qty() - sellable;
        if remaining_abs == 0 {
            pos.lots.remove(i);
        } else {
            pos.lots[i].qty_signed = remaining_abs;
            i += 1;
        }
        qty -= sellable;
    }

    if qty > 0 {
        pos.lots.push(Lot::short(qty, sell_px));
    }
    realized
}

/// Unrealized P&L of all lots at the position's current mark.
///
/// Each lot is floored separately, so the total is never better than the
/// exact figure.
pub fn unrealized_micros(pos: &PositionState, point_value: Micros) -> Micros {
    pos.lots.iter().fold(Micros::ZERO, |acc, lot| {
        let delta = if lot.is_long() {
            pos.mark - lot.entry_price
        } else {
            lot.entry_price - pos.mark
        };
        acc.saturating_add(pnl_micros(delta, lot.abs_qty(), point_value))
    })
}
