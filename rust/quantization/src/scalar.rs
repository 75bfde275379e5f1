use crate::{QuantizationError, Quantizer, QuantizerStats};
use quiver_distance::euclidean_distance;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct ScalarQuantizerParams {
    /// Code width per dimension; 8 or 16.
    pub bits: u8,
}

impl Default for ScalarQuantizerParams {
    fn default() -> Self {
        ScalarQuantizerParams { bits: 8 }
    }
}

/// Per-dimension observed training range. Immutable once trained.
#[derive(Clone, Debug, Serialize, Deserialize)]
struct ScalarCodebook {
    mins: Vec<f64>,
    maxs: Vec<f64>,
}

/// Min–max scalar quantizer. Each coordinate maps linearly onto the trained
/// `[min, max]` range of its dimension, stored as a little-endian unsigned
/// integer of the configured width. Values outside the trained range clamp
/// to the range edges.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScalarQuantizer {
    params: ScalarQuantizerParams,
    codebook: Option<ScalarCodebook>,
}

impl ScalarQuantizer {
    pub fn new(params: ScalarQuantizerParams) -> Result<Self, QuantizationError> {
        if params.bits != 8 && params.bits != 16 {
            return Err(QuantizationError::InvalidConfiguration(format!(
                "bits must be 8 or 16, got {}",
                params.bits
            )));
        }
        Ok(ScalarQuantizer {
            params,
            codebook: None,
        })
    }

    fn levels(&self) -> f64 {
        ((1u32 << self.params.bits) - 1) as f64
    }

    fn bytes_per_dimension(&self) -> usize {
        self.params.bits as usize / 8
    }

    fn codebook(&self) -> Result<&ScalarCodebook, QuantizationError> {
        self.codebook.as_ref().ok_or(QuantizationError::NotTrained)
    }

    fn check_dimensionality(&self, len: usize) -> Result<(), QuantizationError> {
        let expected = self.codebook()?.mins.len();
        if len != expected {
            return Err(QuantizationError::DimensionMismatch {
                expected,
                actual: len,
            });
        }
        Ok(())
    }
}

impl Quantizer for ScalarQuantizer {
    fn train(&mut self, samples: &[Vec<f64>]) -> Result<(), QuantizationError> {
        if samples.is_empty() {
            return Err(QuantizationError::EmptyTrainingSample);
        }
        let dim = samples[0].len();
        let mut mins = vec![f64::INFINITY; dim];
        let mut maxs = vec![f64::NEG_INFINITY; dim];
        for sample in samples {
            if sample.len() != dim {
                return Err(QuantizationError::DimensionMismatch {
                    expected: dim,
                    actual: sample.len(),
                });
            }
            for (d, &x) in sample.iter().enumerate() {
                if x < mins[d] {
                    mins[d] = x;
                }
                if x > maxs[d] {
                    maxs[d] = x;
                }
            }
        }
        self.codebook = Some(ScalarCodebook { mins, maxs });
        Ok(())
    }

    fn is_trained(&self) -> bool {
        self.codebook.is_some()
    }

    fn encode(&self, vector: &[f64]) -> Result<Vec<u8>, QuantizationError> {
        self.check_dimensionality(vector.len())?;
        let codebook = self.codebook()?;
        let levels = self.levels();
        let mut code = Vec::with_capacity(vector.len() * self.bytes_per_dimension());
        for (d, &x) in vector.iter().enumerate() {
            let range = codebook.maxs[d] - codebook.mins[d];
            let quantized = if range == 0.0 {
                0u32
            } else {
                (((x - codebook.mins[d]) / range * levels).round()).clamp(0.0, levels) as u32
            };
            match self.params.bits {
                8 => code.push(quantized as u8),
                _ => code.extend_from_slice(&(quantized as u16).to_le_bytes()),
            }
        }
        Ok(code)
    }

    fn decode(&self, code: &[u8]) -> Result<Vec<f64>, QuantizationError> {
        let codebook = self.codebook()?;
        let width = self.bytes_per_dimension();
        let expected = codebook.mins.len() * width;
        if code.len() != expected {
            return Err(QuantizationError::InvalidCode {
                expected,
                actual: code.len(),
            });
        }
        let levels = self.levels();
        let mut vector = Vec::with_capacity(codebook.mins.len());
        for (d, chunk) in code.chunks_exact(width).enumerate() {
            let quantized = match self.params.bits {
                8 => chunk[0] as f64,
                _ => u16::from_le_bytes([chunk[0], chunk[1]]) as f64,
            };
            let range = codebook.maxs[d] - codebook.mins[d];
            vector.push(codebook.mins[d] + quantized / levels * range);
        }
        Ok(vector)
    }

    fn asymmetric_distance(&self, query: &[f64], code: &[u8]) -> Result<f64, QuantizationError> {
        self.check_dimensionality(query.len())?;
        let reconstruction = self.decode(code)?;
        Ok(euclidean_distance(query, &reconstruction))
    }

    fn stats(&self) -> QuantizerStats {
        match &self.codebook {
            Some(codebook) => {
                let dim = codebook.mins.len();
                let code_size = dim * self.bytes_per_dimension();
                QuantizerStats {
                    trained: true,
                    dimensionality: Some(dim),
                    code_size_bytes: Some(code_size),
                    compression_ratio: Some((dim * 8) as f64 / code_size as f64),
                }
            }
            None => QuantizerStats {
                trained: false,
                dimensionality: None,
                code_size_bytes: None,
                compression_ratio: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn trained(bits: u8, samples: &[Vec<f64>]) -> ScalarQuantizer {
        let mut q = ScalarQuantizer::new(ScalarQuantizerParams { bits }).unwrap();
        q.train(samples).unwrap();
        q
    }

    #[test]
    fn test_rejects_unsupported_widths() {
        assert!(ScalarQuantizer::new(ScalarQuantizerParams { bits: 4 }).is_err());
        assert!(ScalarQuantizer::new(ScalarQuantizerParams { bits: 32 }).is_err());
    }

    #[test]
    fn test_untrained_operations_fail() {
        let q = ScalarQuantizer::new(ScalarQuantizerParams::default()).unwrap();
        assert!(!q.is_trained());
        assert!(matches!(
            q.encode(&[1.0]),
            Err(QuantizationError::NotTrained)
        ));
        assert!(matches!(
            q.decode(&[0u8]),
            Err(QuantizationError::NotTrained)
        ));
        assert!(q.stats().compression_ratio.is_none());
    }

    #[test]
    fn test_round_trip_error_within_one_step() {
        let mut rng = StdRng::seed_from_u64(42);
        let samples: Vec<Vec<f64>> = (0..200)
            .map(|_| (0..16).map(|_| rng.gen_range(-3.0..3.0)).collect())
            .collect();
        for bits in [8u8, 16u8] {
            let q = trained(bits, &samples);
            let levels = ((1u32 << bits) - 1) as f64;
            for sample in samples.iter().take(50) {
                let decoded = q.decode(&q.encode(sample).unwrap()).unwrap();
                for d in 0..sample.len() {
                    let range = 6.0; // generous bound: actual trained range is tighter
                    let step = range / levels;
                    assert!(
                        (decoded[d] - sample[d]).abs() <= step,
                        "bits={} dim={} error {} exceeds step {}",
                        bits,
                        d,
                        (decoded[d] - sample[d]).abs(),
                        step
                    );
                }
            }
        }
    }

    #[test]
    fn test_out_of_range_values_clamp() {
        let samples = vec![vec![0.0, 0.0], vec![1.0, 1.0]];
        let q = trained(8, &samples);
        let decoded = q.decode(&q.encode(&[5.0, -5.0]).unwrap()).unwrap();
        assert!((decoded[0] - 1.0).abs() < 1e-12);
        assert!((decoded[1] - 0.0).abs() < 1e-12);
    }

    #[test]
    fn test_constant_dimension_decodes_to_constant() {
        let samples = vec![vec![7.0, 1.0], vec![7.0, 2.0]];
        let q = trained(8, &samples);
        let decoded = q.decode(&q.encode(&[7.0, 1.5]).unwrap()).unwrap();
        assert_eq!(decoded[0], 7.0);
    }

    #[test]
    fn test_stats_report_ratio() {
        let samples = vec![vec![0.0; 32], vec![1.0; 32]];
        assert_eq!(trained(8, &samples).stats().compression_ratio, Some(8.0));
        assert_eq!(trained(16, &samples).stats().compression_ratio, Some(4.0));
    }

    #[test]
    fn test_asymmetric_distance_tracks_euclidean() {
        let mut rng = StdRng::seed_from_u64(42);
        let samples: Vec<Vec<f64>> = (0..100)
            .map(|_| (0..8).map(|_| rng.gen_range(-1.0..1.0)).collect())
            .collect();
        let q = trained(16, &samples);
        let query: Vec<f64> = (0..8).map(|_| rng.gen_range(-1.0..1.0)).collect();
        for sample in samples.iter().take(20) {
            let code = q.encode(sample).unwrap();
            let approx = q.asymmetric_distance(&query, &code).unwrap();
            let exact = euclidean_distance(&query, sample);
            assert!((approx - exact).abs() < 0.01);
        }
    }
}
