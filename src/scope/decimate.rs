use std::collections::VecDeque;

/// One output pixel column of a dense decimation.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Column {
    pub median: f64,
    pub min: f64,
    pub max: f64,
}

/// A buffer reduced to at most one entry per pixel column.
#[derive(Clone, Debug, PartialEq)]
pub enum Decimation {
    /// One `[x, value]` pair per raw sample; each pixel covers less than one sample.
    Sparse(Vec<[f64; 2]>),
    /// One column per pixel, in order; each pixel covers one or more samples.
    Dense(Vec<Column>),
}

impl Decimation {
    pub fn is_dense(&self) -> bool {
        matches!(self, Decimation::Dense(_))
    }

    pub fn len(&self) -> usize {
        match self {
            Decimation::Sparse(points) => points.len(),
            Decimation::Dense(columns) => columns.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// How many samples one pixel column covers, or `None` when the geometry is degenerate.
pub fn samples_per_pixel(calibration: f64, hscale: f64, width: u32) -> Option<f64> {
    if width == 0 || hscale == 0.0 {
        return None;
    }
    let spp = calibration / hscale / f64::from(width);
    (spp.is_finite() && spp > 0.0).then_some(spp)
}

/// Decimation of a trace buffer, tagged with the geometry it was built for.
#[derive(Clone, Debug)]
pub struct DecimationCache {
    width: u32,
    samples_per_pixel: f64,
    form: Decimation,
}

impl DecimationCache {
    pub fn build(samples: &VecDeque<f64>, width: u32, samples_per_pixel: f64) -> Self {
        let form = if samples_per_pixel <= 1.0 {
            Decimation::Sparse(
                samples
                    .iter()
                    .enumerate()
                    .map(|(i, &v)| [i as f64 / samples_per_pixel, v])
                    .collect(),
            )
        } else {
            Decimation::Dense(dense_columns(samples, samples_per_pixel))
        };
        Self {
            width,
            samples_per_pixel,
            form,
        }
    }

    pub fn is_valid_for(&self, width: u32, samples_per_pixel: f64) -> bool {
        self.width == width && self.samples_per_pixel == samples_per_pixel
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn samples_per_pixel(&self) -> f64 {
        self.samples_per_pixel
    }

    pub fn form(&self) -> &Decimation {
        &self.form
    }
}

fn dense_columns(samples: &VecDeque<f64>, samples_per_pixel: f64) -> Vec<Column> {
    let mut columns = Vec::with_capacity((samples.len() as f64 / samples_per_pixel).ceil() as usize);
    let mut run = Vec::with_capacity(samples_per_pixel.ceil() as usize);
    let mut current = 0usize;
    for (i, &value) in samples.iter().enumerate() {
        let column = (i as f64 / samples_per_pixel).floor() as usize;
        if column != current && !run.is_empty() {
            columns.push(reduce_run(&mut run));
            run.clear();
        }
        current = column;
        run.push(value);
    }
    if !run.is_empty() {
        columns.push(reduce_run(&mut run));
    }
    columns
}

/// Median is element `len / 2` of the ordered run. Reorders `run`.
fn reduce_run(run: &mut [f64]) -> Column {
    let (min, max) = run
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    let mid = run.len() / 2;
    let (_, median, _) = run.select_nth_unstable_by(mid, f64::total_cmp);
    Column {
        median: *median,
        min,
        max,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer(values: &[f64]) -> VecDeque<f64> {
        values.iter().copied().collect()
    }

    #[test]
    fn dense_run_reduces_to_median_min_max() {
        let cache = DecimationCache::build(&buffer(&[5.0, 1.0, 3.0, 2.0, 4.0]), 1, 5.0);
        assert_eq!(
            cache.form(),
            &Decimation::Dense(vec![Column {
                median: 3.0,
                min: 1.0,
                max: 5.0
            }])
        );
    }

    #[test]
    fn even_run_takes_upper_middle_as_median() {
        let cache = DecimationCache::build(&buffer(&[4.0, 1.0, 3.0, 2.0]), 1, 4.0);
        let Decimation::Dense(columns) = cache.form() else {
            panic!("expected dense form");
        };
        assert_eq!(
            columns,
            &vec![Column {
                median: 3.0,
                min: 1.0,
                max: 4.0
            }]
        );
    }

    #[test]
    fn trailing_partial_run_is_kept() {
        let cache = DecimationCache::build(&buffer(&[1.0, 2.0, 3.0, 4.0, 9.0]), 2, 2.0);
        let Decimation::Dense(columns) = cache.form() else {
            panic!("expected dense form");
        };
        assert_eq!(columns.len(), 3);
        assert_eq!(columns[1].min, 3.0);
        assert_eq!(columns[1].max, 4.0);
        assert_eq!(columns[2].median, 9.0);
    }

    #[test]
    fn sparse_form_spreads_samples() {
        let cache = DecimationCache::build(&buffer(&[1.0, 2.0, 3.0]), 640, 0.5);
        assert_eq!(
            cache.form(),
            &Decimation::Sparse(vec![[0.0, 1.0], [2.0, 2.0], [4.0, 3.0]])
        );
    }

    #[test]
    fn exactly_one_sample_per_pixel_is_sparse() {
        let cache = DecimationCache::build(&buffer(&[1.0, 2.0]), 4, 1.0);
        assert!(!cache.form().is_dense());
    }

    #[test]
    fn empty_buffer_decimates_to_nothing() {
        assert!(DecimationCache::build(&VecDeque::new(), 640, 3.0).form().is_empty());
        assert!(DecimationCache::build(&VecDeque::new(), 640, 0.5).form().is_empty());
    }

    #[test]
    fn degenerate_geometry_has_no_density() {
        assert_eq!(samples_per_pixel(1000.0, 1.0, 0), None);
        assert_eq!(samples_per_pixel(1000.0, 0.0, 640), None);
        assert_eq!(samples_per_pixel(0.0, 1.0, 640), None);
        assert_eq!(samples_per_pixel(1000.0, 2.0, 250), Some(2.0));
    }
}
