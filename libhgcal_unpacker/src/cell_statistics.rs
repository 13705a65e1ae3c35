use fxhash::FxHashMap;

use super::constants::TCTP_TOT_THRESHOLD;
use super::digi::EventData;
use super::electronics_id::ElectronicsId;

pub const N_COVARIATES: usize = 3;

/// Running moments of one channel's sample together with three covariates.
///
/// Only sums are kept, so accumulators from different workers can be merged exactly.
/// Statistics of an empty accumulator, and correlations or slopes against a covariate with
/// zero variance, are NaN.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CellStatistics {
    n: u64,
    sum_x: f64,
    sum_xx: f64,
    sum_s: [f64; N_COVARIATES],
    sum_ss: [f64; N_COVARIATES],
    sum_xs: [f64; N_COVARIATES],
}

impl CellStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, x: f64, covariate1: f64, covariate2: f64, covariate3: f64) {
        self.n += 1;
        self.sum_x += x;
        self.sum_xx += x * x;
        for (i, s) in [covariate1, covariate2, covariate3].into_iter().enumerate() {
            self.sum_s[i] += s;
            self.sum_ss[i] += s * s;
            self.sum_xs[i] += x * s;
        }
    }

    pub fn merge(&mut self, other: &CellStatistics) {
        self.n += other.n;
        self.sum_x += other.sum_x;
        self.sum_xx += other.sum_xx;
        for i in 0..N_COVARIATES {
            self.sum_s[i] += other.sum_s[i];
            self.sum_ss[i] += other.sum_ss[i];
            self.sum_xs[i] += other.sum_xs[i];
        }
    }

    pub fn count(&self) -> u64 {
        self.n
    }

    // Population variance; rounding can leave a tiny negative value for constant samples
    fn variance(sum: f64, sum_sq: f64, n: f64) -> f64 {
        let mean = sum / n;
        (sum_sq / n - mean * mean).max(0.0)
    }

    /// Population mean and standard deviation of the sample
    pub fn mean_and_stddev(&self) -> (f64, f64) {
        if self.n == 0 {
            return (f64::NAN, f64::NAN);
        }
        let n = self.n as f64;
        (
            self.sum_x / n,
            Self::variance(self.sum_x, self.sum_xx, n).sqrt(),
        )
    }

    fn covariance(&self, i: usize) -> f64 {
        let n = self.n as f64;
        self.sum_xs[i] / n - (self.sum_x / n) * (self.sum_s[i] / n)
    }

    pub fn pearson_correlation(&self) -> [f64; N_COVARIATES] {
        let mut r = [f64::NAN; N_COVARIATES];
        if self.n == 0 {
            return r;
        }
        let n = self.n as f64;
        let var_x = Self::variance(self.sum_x, self.sum_xx, n);
        for (i, r_i) in r.iter_mut().enumerate() {
            let denominator = (var_x * Self::variance(self.sum_s[i], self.sum_ss[i], n)).sqrt();
            if denominator > 0.0 {
                *r_i = self.covariance(i) / denominator;
            }
        }
        r
    }

    /// Least squares line of the sample against each covariate, as (slope, intercept)
    pub fn slopes_and_intercepts(&self) -> [(f64, f64); N_COVARIATES] {
        let mut lines = [(f64::NAN, f64::NAN); N_COVARIATES];
        if self.n == 0 {
            return lines;
        }
        let n = self.n as f64;
        for (i, line) in lines.iter_mut().enumerate() {
            let var_s = Self::variance(self.sum_s[i], self.sum_ss[i], n);
            if var_s > 0.0 {
                let slope = self.covariance(i) / var_s;
                *line = (slope, self.sum_x / n - slope * self.sum_s[i] / n);
            }
        }
        lines
    }
}

/// Per-channel statistics of decoded events, keyed by electronics id. Each worker fills its
/// own map; maps are combined with [`CellStatisticsMap::merge`].
#[derive(Debug, Clone, Default)]
pub struct CellStatisticsMap {
    stats: FxHashMap<ElectronicsId, CellStatistics>,
}

impl CellStatisticsMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accumulate ADC against common-mode sum, ADC(BX-1) and ToA for every channel whose
    /// ADC is a pedestal sample
    pub fn fill(&mut self, event: &EventData) {
        for channel in event
            .channels
            .iter()
            .filter(|c| !c.is_char_mode() && c.tctp < TCTP_TOT_THRESHOLD)
        {
            self.stats.entry(channel.id).or_default().add(
                channel.adc as f64,
                channel.cm as f64,
                channel.adcm1 as f64,
                channel.toa as f64,
            );
        }
    }

    pub fn merge(&mut self, other: &CellStatisticsMap) {
        for (id, stats) in &other.stats {
            self.stats.entry(*id).or_default().merge(stats);
        }
    }

    pub fn get(&self, id: &ElectronicsId) -> Option<&CellStatistics> {
        self.stats.get(id)
    }

    pub fn len(&self) -> usize {
        self.stats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stats.is_empty()
    }

    /// Entries in ascending electronics id order
    pub fn sorted(&self) -> Vec<(ElectronicsId, &CellStatistics)> {
        let mut entries: Vec<(ElectronicsId, &CellStatistics)> =
            self.stats.iter().map(|(id, stats)| (*id, stats)).collect();
        entries.sort_by_key(|(id, _)| *id);
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::FLAG_CHAR_MODE;
    use crate::digi::DecodedChannel;

    #[test]
    fn test_identical_samples() {
        let mut stats = CellStatistics::new();
        for _ in 0..50 {
            stats.add(123.0, 4.0, 5.0, 6.0);
        }
        assert_eq!(stats.count(), 50);
        let (mean, stddev) = stats.mean_and_stddev();
        assert_eq!(mean, 123.0);
        assert_eq!(stddev, 0.0);
        assert!(stats.pearson_correlation().iter().all(|r| r.is_nan()));
        assert!(stats.slopes_and_intercepts().iter().all(|(m, b)| m.is_nan() && b.is_nan()));
    }

    #[test]
    fn test_empty() {
        let stats = CellStatistics::new();
        let (mean, stddev) = stats.mean_and_stddev();
        assert!(mean.is_nan());
        assert!(stddev.is_nan());
        assert!(stats.pearson_correlation()[0].is_nan());
    }

    #[test]
    fn test_linear_relation() {
        let mut stats = CellStatistics::new();
        for i in 0..10 {
            let s = i as f64;
            // x = 2 s + 10 against the first covariate, anti-correlated with the second
            stats.add(2.0 * s + 10.0, s, -s, 1.0);
        }
        let (mean, stddev) = stats.mean_and_stddev();
        assert!((mean - 19.0).abs() < 1e-9);
        // Population stddev of 0..9 is sqrt(8.25), scaled by 2
        assert!((stddev - 2.0 * 8.25f64.sqrt()).abs() < 1e-9);
        let r = stats.pearson_correlation();
        assert!((r[0] - 1.0).abs() < 1e-9);
        assert!((r[1] + 1.0).abs() < 1e-9);
        assert!(r[2].is_nan());
        let lines = stats.slopes_and_intercepts();
        assert!((lines[0].0 - 2.0).abs() < 1e-9);
        assert!((lines[0].1 - 10.0).abs() < 1e-9);
        assert!((lines[1].0 + 2.0).abs() < 1e-9);
        assert!(lines[2].0.is_nan());
    }

    #[test]
    fn test_merge_equals_single_pass() {
        let mut all = CellStatistics::new();
        let mut first = CellStatistics::new();
        let mut second = CellStatistics::new();
        for i in 0..20 {
            let x = (i * 7 % 13) as f64;
            all.add(x, i as f64, 1.0, 0.5 * i as f64);
            if i < 8 {
                first.add(x, i as f64, 1.0, 0.5 * i as f64);
            } else {
                second.add(x, i as f64, 1.0, 0.5 * i as f64);
            }
        }
        first.merge(&second);
        assert_eq!(first.count(), all.count());
        let (m1, s1) = first.mean_and_stddev();
        let (m2, s2) = all.mean_and_stddev();
        assert!((m1 - m2).abs() < 1e-9);
        assert!((s1 - s2).abs() < 1e-9);
    }

    #[test]
    fn test_map_fill() {
        let id = ElectronicsId::new(true, 0, 0, 0, 1, 3);
        let mut event = EventData::new(1);
        event.channels.push(DecodedChannel {
            id,
            adc: 100,
            cm: 8,
            ..Default::default()
        });
        event.channels.push(DecodedChannel {
            id: id.with_channel(4),
            tctp: 3,
            tot: 500,
            ..Default::default()
        });
        event.channels.push(DecodedChannel {
            id: id.with_channel(18),
            adc: 900,
            flags: FLAG_CHAR_MODE,
            ..Default::default()
        });
        let mut map = CellStatisticsMap::new();
        map.fill(&event);
        map.fill(&event);
        assert_eq!(map.len(), 1);
        assert_eq!(map.get(&id).unwrap().count(), 2);

        let mut other = CellStatisticsMap::new();
        other.fill(&event);
        map.merge(&other);
        assert_eq!(map.get(&id).unwrap().count(), 3);
        assert_eq!(map.sorted()[0].0, id);
    }
}
