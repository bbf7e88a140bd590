/// Decimal places used when showing a converted amount.
pub const AMOUNT_DECIMALS: u32 = 2;
/// Decimal places used when showing a rate.
pub const RATE_DECIMALS: u32 = 4;

pub fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}

pub fn display_rate(value: f64) -> String {
    format!("{:.*}", RATE_DECIMALS as usize, value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounds_half_away_from_zero() {
        assert_eq!(round_to(90.004, 2), 90.0);
        assert_eq!(round_to(1.23456, 4), 1.2346);
    }

    #[test]
    fn display_pads_decimals() {
        assert_eq!(display_rate(0.9), "0.9000");
    }
}
