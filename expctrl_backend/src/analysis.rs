//! Atom loading and retention statistics.
//!
//! Each shot images an array of trapping sites twice. A site is occupied in an image when its
//! count exceeds the detection threshold. Per site, the loading fraction is the share of shots
//! occupied in the first image, and the retention fraction is the share of those shots still
//! occupied in the second image. Fractions come with binomial standard errors
//! `sqrt(p (1 - p) / n)`.

use ndarray::{Array1, Array2, Axis, Zip};

use crate::error::{CtrlError, CtrlResult};

/// `counts > threshold`, element-wise.
pub fn occupation(counts: &Array2<f64>, threshold: f64) -> Array2<bool> {
    counts.mapv(|count| count > threshold)
}

/// Binomial standard error of a fraction `p` estimated from `n` trials. NaN for `n = 0`.
pub fn binomial_stderr(p: f64, n: f64) -> f64 {
    if n > 0. {
        (p * (1. - p) / n).sqrt()
    } else {
        f64::NAN
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoadingStats {
    pub nshots: usize,
    /// Per site, shape `[nsites]`.
    pub loading: Array1<f64>,
    pub loading_err: Array1<f64>,
    /// Per site; NaN for sites never loaded.
    pub retention: Array1<f64>,
    pub retention_err: Array1<f64>,
    /// Loaded atoms per shot, averaged over shots.
    pub mean_loaded: f64,
    /// Loading fraction over all sites and shots.
    pub total_loading: f64,
    /// Retention over all loaded sites of all shots; NaN if nothing was loaded.
    pub total_retention: f64,
}

impl LoadingStats {
    /// Computes statistics from `[nshots, nsites]` counts of the first and second images.
    ///
    /// ```
    /// use expctrl_backend::analysis::LoadingStats;
    /// use ndarray::array;
    ///
    /// let first = array![[10., 0.], [10., 10.]];
    /// let second = array![[10., 0.], [0., 10.]];
    /// let stats = LoadingStats::from_counts(&first, &second, 5.).unwrap();
    /// assert_eq!(stats.loading.to_vec(), vec![1., 0.5]);
    /// assert_eq!(stats.retention.to_vec(), vec![0.5, 1.]);
    /// assert_eq!(stats.mean_loaded, 1.5);
    /// ```
    pub fn from_counts(
        first: &Array2<f64>,
        second: &Array2<f64>,
        threshold: f64,
    ) -> CtrlResult<Self> {
        if first.dim() != second.dim() {
            return Err(CtrlError::Analysis(format!(
                "first image counts have shape {:?} but second image counts {:?}",
                first.dim(),
                second.dim()
            )));
        }
        let (nshots, nsites) = first.dim();
        if nshots == 0 {
            return Err(CtrlError::Analysis("no shots to analyze".to_string()));
        }
        let loaded = occupation(first, threshold);
        let mut retained = occupation(second, threshold);
        Zip::from(&mut retained)
            .and(&loaded)
            .for_each(|kept, &was_loaded| *kept &= was_loaded);

        let count = |occ: &Array2<bool>| -> Array1<f64> {
            occ.map_axis(Axis(0), |col| col.iter().filter(|&&x| x).count() as f64)
        };
        let nloaded = count(&loaded);
        let nretained = count(&retained);

        let loading = nloaded.mapv(|n| n / nshots as f64);
        let loading_err = loading.mapv(|p| binomial_stderr(p, nshots as f64));
        let retention = Zip::from(&nretained)
            .and(&nloaded)
            .map_collect(|&kept, &n| if n > 0. { kept / n } else { f64::NAN });
        let retention_err = Zip::from(&retention)
            .and(&nloaded)
            .map_collect(|&p, &n| binomial_stderr(p, n));

        let total_loaded = nloaded.sum();
        let total_retained = nretained.sum();
        let total_retention = if total_loaded > 0. {
            total_retained / total_loaded
        } else {
            f64::NAN
        };
        Ok(Self {
            nshots,
            loading,
            loading_err,
            retention,
            retention_err,
            mean_loaded: total_loaded / nshots as f64,
            total_loading: if nsites > 0 {
                total_loaded / (nshots * nsites) as f64
            } else {
                f64::NAN
            },
            total_retention,
        })
    }
}
