use std::collections::{BTreeMap, BTreeSet};

use bitvec::{order::Msb0, view::BitView};
use log::{debug, info};
use ndarray::{s, Array2, ArrayView2};
use serde::{Deserialize, Serialize};

use crate::*;

/// Anything that turns an image (and a mask restricting where interest
/// points may be detected) into a matrix of local descriptors.
///
/// Implemented for every `Fn(&I, &M) -> VocabResult<Descriptors>`, so plain
/// functions and closures can be handed to [`DescriptorStore::extract`]
/// directly.
pub trait Extractor<I, M> {
    fn extract(&self, image: &I, mask: &M) -> VocabResult<Descriptors>;
}

impl<I, M, F> Extractor<I, M> for F
where
    F: Fn(&I, &M) -> VocabResult<Descriptors>,
{
    fn extract(&self, image: &I, mask: &M) -> VocabResult<Descriptors> {
        self(image, mask)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
/// Local descriptors of one image along with where they came from and the
/// image's class label. Rows are interest points, columns descriptor
/// dimensions.
pub struct DescriptorRecord {
    source_id: String,
    label: String,
    descriptors: Descriptors,
}

impl DescriptorRecord {
    pub fn new<S: Into<String>, L: Into<String>>(
        source_id: S,
        label: L,
        descriptors: Descriptors,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            label: label.into(),
            descriptors,
        }
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn descriptors(&self) -> ArrayView2<'_, f32> {
        self.descriptors.view()
    }

    /// Number of interest points.
    pub fn len(&self) -> usize {
        self.descriptors.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.nrows() == 0
    }

    /// Descriptor dimensionality.
    pub fn dim(&self) -> usize {
        self.descriptors.ncols()
    }
}

/// Stack the descriptors of all records into one `[sum(N_i) x D]` matrix.
///
/// Every record is checked for a consistent dimension before anything is
/// copied. No records gives a `0 x 0` matrix.
pub fn pool(records: &[DescriptorRecord]) -> VocabResult<Descriptors> {
    let dim = match records.first() {
        Some(r) => r.dim(),
        None => return Ok(Array2::zeros((0, 0))),
    };
    let mut total = 0;
    for r in records {
        if r.dim() != dim {
            return Err(VocabErr::DimensionMismatch {
                expected: dim,
                found: r.dim(),
            });
        }
        total += r.len();
    }

    let mut pooled = Array2::zeros((total, dim));
    let mut offset = 0;
    for r in records {
        pooled
            .slice_mut(s![offset..offset + r.len(), ..])
            .assign(&r.descriptors);
        offset += r.len();
    }
    Ok(pooled)
}

/// Expand packed binary descriptors into one float column per bit, most
/// significant bit first. Set bits become `1.0`, cleared bits `0.0`.
pub fn unpack_binary<const N: usize>(descs: &[[u8; N]]) -> Descriptors {
    let mut out = Array2::zeros((descs.len(), N * 8));
    for (mut row, d) in out.rows_mut().into_iter().zip(descs) {
        for (x, bit) in row.iter_mut().zip(d[..].view_bits::<Msb0>().iter().by_vals()) {
            if bit {
                *x = 1.;
            }
        }
    }
    out
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
/// Descriptor records of one dataset pass. All records share one descriptor
/// dimension.
pub struct DescriptorStore {
    records: Vec<DescriptorRecord>,
}

impl DescriptorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from records, rejecting inconsistent dimensions.
    pub fn from_records(records: Vec<DescriptorRecord>) -> VocabResult<Self> {
        let mut store = Self::new();
        for r in records {
            store.push(r)?;
        }
        Ok(store)
    }

    /// Append a record. Fails if its dimension differs from the records
    /// already held.
    pub fn push(&mut self, record: DescriptorRecord) -> VocabResult<()> {
        if let Some(dim) = self.dim() {
            if record.dim() != dim {
                return Err(VocabErr::DimensionMismatch {
                    expected: dim,
                    found: record.dim(),
                });
            }
        }
        self.records.push(record);
        Ok(())
    }

    pub fn records(&self) -> &[DescriptorRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Descriptor dimension, `None` while the store is empty.
    pub fn dim(&self) -> Option<usize> {
        self.records.first().map(|r| r.dim())
    }

    /// Total number of descriptors over all records.
    pub fn total_descriptors(&self) -> usize {
        self.records.iter().map(|r| r.len()).sum()
    }

    /// Sorted, de-duplicated class labels. This is the column order used for
    /// per-class output downstream.
    pub fn labels(&self) -> Vec<&str> {
        self.records
            .iter()
            .map(|r| r.label())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Position of `label` in [`labels`](Self::labels).
    pub fn label_index(&self, label: &str) -> Option<usize> {
        self.labels().iter().position(|&l| l == label)
    }

    pub fn pool(&self) -> VocabResult<Descriptors> {
        pool(&self.records)
    }

    /// Run `extractor` over `(source_id, label, image, mask)` items.
    pub fn extract<I, M, E, It>(items: It, extractor: &E) -> VocabResult<Self>
    where
        E: Extractor<I, M> + ?Sized,
        It: IntoIterator<Item = (String, String, I, M)>,
    {
        let mut store = Self::new();
        for (i, (source_id, label, image, mask)) in items.into_iter().enumerate() {
            let descriptors = extractor.extract(&image, &mask)?;
            debug!(
                "Extracted {} descriptors from {} ({} images done)",
                descriptors.nrows(),
                source_id,
                i + 1
            );
            store.push(DescriptorRecord::new(source_id, label, descriptors))?;
        }
        info!(
            "Extracted {} descriptors from {} images",
            store.total_descriptors(),
            store.len()
        );
        Ok(store)
    }

    /// Run several named extractors over a single pass of the images,
    /// producing one store per extractor name.
    pub fn extract_all<I, M, It>(
        items: It,
        extractors: &[(&str, &dyn Extractor<I, M>)],
    ) -> VocabResult<BTreeMap<String, DescriptorStore>>
    where
        It: IntoIterator<Item = (String, String, I, M)>,
    {
        let mut stores: BTreeMap<String, DescriptorStore> = extractors
            .iter()
            .map(|(name, _)| (name.to_string(), Self::new()))
            .collect();
        let mut count = 0;
        for (source_id, label, image, mask) in items {
            for (name, extractor) in extractors {
                let descriptors = extractor.extract(&image, &mask)?;
                if let Some(store) = stores.get_mut(*name) {
                    store.push(DescriptorRecord::new(
                        source_id.clone(),
                        label.clone(),
                        descriptors,
                    ))?;
                }
            }
            count += 1;
            debug!("Extracted features from {} ({} images done)", source_id, count);
        }
        for (name, store) in stores.iter() {
            info!(
                "{}: {} descriptors from {} images",
                name,
                store.total_descriptors(),
                store.len()
            );
        }
        Ok(stores)
    }
}
