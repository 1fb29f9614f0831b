use fixed::types::I32F32;

/// Q32.32 fixed-point: 32 integer bits, 32 fractional bits.
/// Used for all quantities (tons, pieces, percentages) in the sim loop.
pub type Qty = I32F32;

/// Ticks are the atomic unit of simulation time.
pub type Ticks = u64;

/// Convert an f64 to Qty. Use only for initialization, never in sim loop.
#[inline]
pub fn qty(v: f64) -> Qty {
    Qty::from_num(v)
}

/// Convert a Qty to f64. Use only for display, never in sim loop.
#[inline]
pub fn qty_to_f64(v: Qty) -> f64 {
    v.to_num::<f64>()
}

/// Ticks needed to run `quantity` units at `per_unit` ticks per unit,
/// rounded up to whole ticks. Zero quantity takes zero ticks.
#[inline]
pub fn span_for(quantity: Qty, per_unit: Ticks) -> Ticks {
    if quantity <= Qty::from_num(0) {
        return 0;
    }
    let total = quantity * Qty::from_num(per_unit);
    let whole: i64 = total.to_num();
    let ceiled = if total.frac() > Qty::from_num(0) {
        whole + 1
    } else {
        whole
    };
    ceiled.max(0) as Ticks
}

/// Checked multiplication that returns None on overflow.
#[inline]
pub fn checked_mul(a: Qty, b: Qty) -> Option<Qty> {
    a.checked_mul(b)
}

/// Checked division that returns None on a zero divisor.
#[inline]
pub fn checked_div(a: Qty, b: Qty) -> Option<Qty> {
    a.checked_div(b)
}
