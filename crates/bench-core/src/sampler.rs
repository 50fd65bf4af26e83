use rand::Rng;

/// Feature names in the positional order the served model expects.
pub const FEATURE_NAMES: [&str; FEATURE_COUNT] = [
    "amount",
    "merchant_id",
    "country",
    "hour",
    "day_of_week",
    "day_of_month",
    "is_night",
    "is_weekend",
    "log_amount",
    "amount_squared",
    "high_amount",
    "unusual_time",
    "high_risk_device",
    "high_risk_transaction",
    "total_risk_factors",
];

pub const FEATURE_COUNT: usize = 15;

const AMOUNT_MU: f64 = 4.5;
const AMOUNT_SIGMA: f64 = 1.5;
const AMOUNT_MIN: f64 = 1.0;
const AMOUNT_MAX: f64 = 10_000.0;
/// z-score of the 75th percentile of a standard normal
const Z_P75: f64 = 0.674_489_750_196_081_7;

const NUM_MERCHANTS: u32 = 1000;
const NUM_COUNTRIES: u32 = 50;

/// One synthetic transaction, already feature-engineered.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transaction {
    pub amount: f64,
    pub merchant_id: u32,
    pub country: u32,
    pub hour: u32,
    pub day_of_week: u32,
    pub day_of_month: u32,
    pub is_night: bool,
    pub is_weekend: bool,
    pub log_amount: f64,
    pub amount_squared: f64,
    pub high_amount: bool,
    pub unusual_time: bool,
    pub high_risk_device: bool,
    pub high_risk_transaction: bool,
    pub total_risk_factors: u32,
}

impl Transaction {
    /// Flatten into the wire row, following [`FEATURE_NAMES`].
    pub fn features(&self) -> [f32; FEATURE_COUNT] {
        [
            self.amount as f32,
            self.merchant_id as f32,
            self.country as f32,
            self.hour as f32,
            self.day_of_week as f32,
            self.day_of_month as f32,
            flag(self.is_night),
            flag(self.is_weekend),
            self.log_amount as f32,
            self.amount_squared as f32,
            flag(self.high_amount),
            flag(self.unusual_time),
            flag(self.high_risk_device),
            flag(self.high_risk_transaction),
            self.total_risk_factors as f32,
        ]
    }
}

fn flag(b: bool) -> f32 {
    if b {
        1.0
    } else {
        0.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DeviceType {
    Phone,
    Desktop,
    Tablet,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TransactionKind {
    CardPresent,
    CardNotPresent,
    Online,
    Atm,
}

const DEVICE_TYPES: [DeviceType; 4] = [
    DeviceType::Phone,
    DeviceType::Desktop,
    DeviceType::Tablet,
    DeviceType::Unknown,
];

const TRANSACTION_KINDS: [TransactionKind; 4] = [
    TransactionKind::CardPresent,
    TransactionKind::CardNotPresent,
    TransactionKind::Online,
    TransactionKind::Atm,
];

/// Amount above which a transaction counts as high-value (p75 of the
/// unclipped log-normal).
pub fn high_amount_threshold() -> f64 {
    (AMOUNT_MU + AMOUNT_SIGMA * Z_P75).exp()
}

/// Draw one transaction from the production-shaped distribution.
///
/// Raw fields (amount, ids, calendar fields, device, channel) are sampled;
/// every flag and aggregate is derived from them so the record is
/// internally consistent.
pub fn sample<R: Rng + ?Sized>(rng: &mut R) -> Transaction {
    let amount = sample_amount(rng);
    let merchant_id = rng.gen_range(1..=NUM_MERCHANTS);
    let country = rng.gen_range(1..=NUM_COUNTRIES);
    let hour = rng.gen_range(0..24);
    let day_of_week = rng.gen_range(0..7);
    let day_of_month = rng.gen_range(1..=28);
    let device = DEVICE_TYPES[rng.gen_range(0..DEVICE_TYPES.len())];
    let kind = TRANSACTION_KINDS[rng.gen_range(0..TRANSACTION_KINDS.len())];

    let is_night = hour < 6;
    let high_amount = amount > high_amount_threshold();
    let unusual_time = is_night;
    let high_risk_device = matches!(device, DeviceType::Unknown | DeviceType::Desktop);
    let high_risk_transaction = matches!(
        kind,
        TransactionKind::CardNotPresent | TransactionKind::Online
    );
    let total_risk_factors = [high_amount, unusual_time, high_risk_device, high_risk_transaction]
        .iter()
        .filter(|&&b| b)
        .count() as u32;

    Transaction {
        amount,
        merchant_id,
        country,
        hour,
        day_of_week,
        day_of_month,
        is_night,
        is_weekend: day_of_week >= 5,
        log_amount: amount.ln_1p(),
        amount_squared: amount * amount,
        high_amount,
        unusual_time,
        high_risk_device,
        high_risk_transaction,
        total_risk_factors,
    }
}

/// Log-normal amount via Box-Muller, clipped and rounded to cents.
fn sample_amount<R: Rng + ?Sized>(rng: &mut R) -> f64 {
    // u1 must be non-zero for ln
    let u1: f64 = rng.gen_range(f64::EPSILON..1.0);
    let u2: f64 = rng.gen();
    let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
    let raw = (AMOUNT_MU + AMOUNT_SIGMA * z).exp();
    (raw.clamp(AMOUNT_MIN, AMOUNT_MAX) * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_same_seed_same_transactions() {
        let mut a = StdRng::seed_from_u64(7);
        let mut b = StdRng::seed_from_u64(7);
        for _ in 0..50 {
            assert_eq!(sample(&mut a), sample(&mut b));
        }
    }

    #[test]
    fn test_fields_within_ranges() {
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..2000 {
            let tx = sample(&mut rng);
            assert!((AMOUNT_MIN..=AMOUNT_MAX).contains(&tx.amount));
            assert!((1..=NUM_MERCHANTS).contains(&tx.merchant_id));
            assert!((1..=NUM_COUNTRIES).contains(&tx.country));
            assert!(tx.hour < 24);
            assert!(tx.day_of_week < 7);
            assert!((1..=28).contains(&tx.day_of_month));
        }
    }

    #[test]
    fn test_derived_flags_consistent() {
        let mut rng = StdRng::seed_from_u64(1234);
        for _ in 0..2000 {
            let tx = sample(&mut rng);
            assert_eq!(tx.is_night, tx.hour < 6);
            assert_eq!(tx.unusual_time, tx.is_night);
            assert_eq!(tx.is_weekend, tx.day_of_week >= 5);
            assert_eq!(tx.high_amount, tx.amount > high_amount_threshold());
            assert!((tx.log_amount - tx.amount.ln_1p()).abs() < 1e-12);
            assert!((tx.amount_squared - tx.amount * tx.amount).abs() < 1e-6);

            let expected = [
                tx.high_amount,
                tx.unusual_time,
                tx.high_risk_device,
                tx.high_risk_transaction,
            ]
            .iter()
            .filter(|&&b| b)
            .count() as u32;
            assert_eq!(tx.total_risk_factors, expected);
        }
    }

    #[test]
    fn test_features_follow_schema_order() {
        let mut rng = StdRng::seed_from_u64(3);
        let tx = sample(&mut rng);
        let row = tx.features();

        assert_eq!(row.len(), FEATURE_NAMES.len());
        assert_eq!(row[0], tx.amount as f32);
        assert_eq!(row[1], tx.merchant_id as f32);
        assert_eq!(row[3], tx.hour as f32);
        assert_eq!(row[6], if tx.is_night { 1.0 } else { 0.0 });
        assert_eq!(row[9], tx.amount_squared as f32);
        assert_eq!(row[14], tx.total_risk_factors as f32);
        assert_eq!(FEATURE_NAMES[9], "amount_squared");
        assert_eq!(FEATURE_NAMES[14], "total_risk_factors");
    }

    #[test]
    fn test_amount_roughly_lognormal() {
        let mut rng = StdRng::seed_from_u64(99);
        let n = 10_000;
        let above = (0..n)
            .map(|_| sample(&mut rng))
            .filter(|tx| tx.high_amount)
            .count();
        // p75 threshold: about a quarter of samples should exceed it
        let frac = above as f64 / n as f64;
        assert!((0.2..0.3).contains(&frac), "fraction above p75: {frac}");
    }
}
