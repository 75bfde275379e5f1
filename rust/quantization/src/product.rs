use crate::kmeans::{kmeans, nearest_centroid, KMeansParams};
use crate::{QuantizationError, Quantizer, QuantizerStats};
use quiver_distance::squared_euclidean_distance;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct ProductQuantizerParams {
    /// Number of contiguous subspaces the dimensionality splits into. The
    /// database dimensionality must divide evenly by this.
    pub num_subspaces: usize,
    /// Centroids per subspace codebook. One code byte per subspace up to
    /// 256, two beyond.
    pub num_clusters: usize,
    /// Lloyd iteration budget per subspace.
    pub max_iterations: usize,
    pub seed: u64,
}

impl Default for ProductQuantizerParams {
    fn default() -> Self {
        ProductQuantizerParams {
            num_subspaces: 8,
            num_clusters: 256,
            max_iterations: 30,
            seed: 42,
        }
    }
}

/// Trained sub-codebooks: `centroids[m][j]` is the `j`-th centroid of
/// subspace `m`, of length `sub_dim`.
#[derive(Clone, Debug, Serialize, Deserialize)]
struct PqCodebook {
    dim: usize,
    sub_dim: usize,
    centroids: Vec<Vec<Vec<f64>>>,
}

/// Product quantizer: splits each vector into `num_subspaces` contiguous
/// blocks, runs k-means per block, and encodes a vector as the per-block
/// nearest-centroid indices. Asymmetric distance sums per-block squared
/// distances between the raw query slice and the coded centroid, so ranking
/// agrees with squared L2 up to codebook approximation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProductQuantizer {
    params: ProductQuantizerParams,
    codebook: Option<PqCodebook>,
}

/// Precomputed per-subspace distance table for one query: `tables[m][j]` is
/// the squared distance from the query's `m`-th slice to centroid `j`.
/// Scoring a code is then `num_subspaces` lookups.
pub struct QueryTable {
    tables: Vec<Vec<f64>>,
}

impl ProductQuantizer {
    pub fn new(params: ProductQuantizerParams) -> Result<Self, QuantizationError> {
        if params.num_subspaces == 0 {
            return Err(QuantizationError::InvalidConfiguration(
                "num_subspaces must be positive".to_string(),
            ));
        }
        if params.num_clusters == 0 || params.num_clusters > u16::MAX as usize + 1 {
            return Err(QuantizationError::InvalidConfiguration(format!(
                "num_clusters must be in 1..=65536, got {}",
                params.num_clusters
            )));
        }
        if params.max_iterations == 0 {
            return Err(QuantizationError::InvalidConfiguration(
                "max_iterations must be positive".to_string(),
            ));
        }
        Ok(ProductQuantizer {
            params,
            codebook: None,
        })
    }

    fn codebook(&self) -> Result<&PqCodebook, QuantizationError> {
        self.codebook.as_ref().ok_or(QuantizationError::NotTrained)
    }

    fn bytes_per_subspace(&self) -> usize {
        if self.params.num_clusters <= 256 {
            1
        } else {
            2
        }
    }

    fn code_len(&self) -> usize {
        self.params.num_subspaces * self.bytes_per_subspace()
    }

    fn check_query(&self, len: usize) -> Result<(), QuantizationError> {
        let expected = self.codebook()?.dim;
        if len != expected {
            return Err(QuantizationError::DimensionMismatch {
                expected,
                actual: len,
            });
        }
        Ok(())
    }

    fn decode_indices(&self, code: &[u8]) -> Result<Vec<usize>, QuantizationError> {
        let expected = self.code_len();
        if code.len() != expected {
            return Err(QuantizationError::InvalidCode {
                expected,
                actual: code.len(),
            });
        }
        let width = self.bytes_per_subspace();
        Ok(code
            .chunks_exact(width)
            .map(|chunk| {
                if width == 1 {
                    chunk[0] as usize
                } else {
                    u16::from_le_bytes([chunk[0], chunk[1]]) as usize
                }
            })
            .collect())
    }

    /// Builds the per-subspace squared-distance table for `query`. Use with
    /// [`QueryTable`] lookups when scoring many codes against one query.
    pub fn query_table(&self, query: &[f64]) -> Result<QueryTable, QuantizationError> {
        self.check_query(query.len())?;
        let codebook = self.codebook()?;
        let tables = codebook
            .centroids
            .iter()
            .enumerate()
            .map(|(m, subspace)| {
                let slice = &query[m * codebook.sub_dim..(m + 1) * codebook.sub_dim];
                subspace
                    .iter()
                    .map(|centroid| squared_euclidean_distance(slice, centroid))
                    .collect()
            })
            .collect();
        Ok(QueryTable { tables })
    }

    /// Scores one code against a precomputed [`QueryTable`].
    pub fn table_distance(
        &self,
        table: &QueryTable,
        code: &[u8],
    ) -> Result<f64, QuantizationError> {
        let indices = self.decode_indices(code)?;
        let mut sum = 0.0;
        for (m, &j) in indices.iter().enumerate() {
            let subspace = &table.tables[m];
            // Clamped-k training can leave fewer centroids than the code
            // width admits; an index past the table is a corrupt code.
            let d = subspace
                .get(j)
                .ok_or(QuantizationError::InvalidCode {
                    expected: subspace.len(),
                    actual: j,
                })?;
            sum += d;
        }
        Ok(sum)
    }

    /// Scores many codes against one query, building the lookup table once.
    pub fn asymmetric_distance_batch(
        &self,
        query: &[f64],
        codes: &[Vec<u8>],
    ) -> Result<Vec<f64>, QuantizationError> {
        let table = self.query_table(query)?;
        codes
            .iter()
            .map(|code| self.table_distance(&table, code))
            .collect()
    }
}

impl Quantizer for ProductQuantizer {
    fn train(&mut self, samples: &[Vec<f64>]) -> Result<(), QuantizationError> {
        if samples.is_empty() {
            return Err(QuantizationError::EmptyTrainingSample);
        }
        let dim = samples[0].len();
        for sample in samples {
            if sample.len() != dim {
                return Err(QuantizationError::DimensionMismatch {
                    expected: dim,
                    actual: sample.len(),
                });
            }
        }
        if dim % self.params.num_subspaces != 0 {
            return Err(QuantizationError::InvalidConfiguration(format!(
                "dimensionality {} is not divisible by {} subspaces",
                dim, self.params.num_subspaces
            )));
        }
        let sub_dim = dim / self.params.num_subspaces;
        let mut centroids = Vec::with_capacity(self.params.num_subspaces);
        for m in 0..self.params.num_subspaces {
            let slices: Vec<Vec<f64>> = samples
                .iter()
                .map(|s| s[m * sub_dim..(m + 1) * sub_dim].to_vec())
                .collect();
            let result = kmeans(
                &slices,
                &KMeansParams {
                    k: self.params.num_clusters,
                    max_iterations: self.params.max_iterations,
                    // Vary the seed per subspace so codebooks are independent
                    // but the whole train stays deterministic.
                    seed: self.params.seed.wrapping_add(m as u64),
                },
            );
            centroids.push(result.centroids);
        }
        self.codebook = Some(PqCodebook {
            dim,
            sub_dim,
            centroids,
        });
        Ok(())
    }

    fn is_trained(&self) -> bool {
        self.codebook.is_some()
    }

    fn encode(&self, vector: &[f64]) -> Result<Vec<u8>, QuantizationError> {
        self.check_query(vector.len())?;
        let codebook = self.codebook()?;
        let width = self.bytes_per_subspace();
        let mut code = Vec::with_capacity(self.code_len());
        for (m, subspace) in codebook.centroids.iter().enumerate() {
            let slice = &vector[m * codebook.sub_dim..(m + 1) * codebook.sub_dim];
            let j = nearest_centroid(slice, subspace);
            if width == 1 {
                code.push(j as u8);
            } else {
                code.extend_from_slice(&(j as u16).to_le_bytes());
            }
        }
        Ok(code)
    }

    fn decode(&self, code: &[u8]) -> Result<Vec<f64>, QuantizationError> {
        let codebook = self.codebook()?;
        let indices = self.decode_indices(code)?;
        let mut vector = Vec::with_capacity(codebook.dim);
        for (m, &j) in indices.iter().enumerate() {
            let subspace = &codebook.centroids[m];
            let centroid = subspace.get(j).ok_or(QuantizationError::InvalidCode {
                expected: subspace.len(),
                actual: j,
            })?;
            vector.extend_from_slice(centroid);
        }
        Ok(vector)
    }

    fn asymmetric_distance(&self, query: &[f64], code: &[u8]) -> Result<f64, QuantizationError> {
        self.check_query(query.len())?;
        let codebook = self.codebook()?;
        let indices = self.decode_indices(code)?;
        let mut sum = 0.0;
        for (m, &j) in indices.iter().enumerate() {
            let slice = &query[m * codebook.sub_dim..(m + 1) * codebook.sub_dim];
            let subspace = &codebook.centroids[m];
            let centroid = subspace.get(j).ok_or(QuantizationError::InvalidCode {
                expected: subspace.len(),
                actual: j,
            })?;
            sum += squared_euclidean_distance(slice, centroid);
        }
        Ok(sum)
    }

    fn stats(&self) -> QuantizerStats {
        match &self.codebook {
            Some(codebook) => {
                let code_size = self.code_len();
                QuantizerStats {
                    trained: true,
                    dimensionality: Some(codebook.dim),
                    code_size_bytes: Some(code_size),
                    compression_ratio: Some((codebook.dim * 8) as f64 / code_size as f64),
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
