use approx::assert_relative_eq;
use fvbow::normalize::l2_norm;
use fvbow::*;
use ndarray::Array2;
use rand::{rngs::StdRng, Rng, SeedableRng};

const DIM: usize = 32;

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Rows scattered around five fixed centers, cycling through them.
fn clustered(rows: usize, rng: &mut StdRng, centers: &Array2<f32>) -> Array2<f32> {
    Array2::from_shape_fn((rows, DIM), |(i, j)| {
        centers[[i % centers.nrows(), j]] + rng.gen_range(-0.5..0.5)
    })
}

/// Three images with 50, 30 and 20 descriptors of dimension 32.
fn corpus() -> DescriptorStore {
    let mut rng = StdRng::seed_from_u64(2024);
    let centers = Array2::from_shape_fn((5, DIM), |_| rng.gen_range(0.0..10.0));
    let records = [("img0", "cat", 50), ("img1", "dog", 30), ("img2", "cat", 20)]
        .iter()
        .map(|&(id, label, rows)| DescriptorRecord::new(id, label, clustered(rows, &mut rng, &centers)))
        .collect();
    DescriptorStore::from_records(records).unwrap()
}

#[test]
fn bovw_scenario() {
    init_logger();
    let store = corpus();
    let codebook = Codebook::build_default(store.records(), 10).unwrap();
    assert_eq!(codebook.centroids().dim(), (10, DIM));

    let bow = encode_bovw(store.records()[0].descriptors(), &codebook).unwrap();
    assert_eq!(bow.len(), 10);
    assert_relative_eq!(l2_norm(&bow), 1.0, epsilon = 1e-6);
    assert!(bow.iter().all(|&x| x >= 0.));

    let again = codebook.encode(store.records()[0].descriptors()).unwrap();
    assert_eq!(bow, again);
}

#[test]
fn fisher_scenario() {
    init_logger();
    let store = corpus();
    let mixture = MixtureModel::fit_default(store.records(), 5).unwrap();
    assert_relative_eq!(mixture.weights().sum(), 1.0, epsilon = 1e-9);
    assert!(mixture.weights().iter().all(|&w| w > 0.));
    assert!(mixture.variances().iter().all(|&v| v > 0.));

    for record in store.records() {
        let fv = encode_fisher(record.descriptors(), &mixture, 0.5).unwrap();
        assert_eq!(fv.len(), 2 * 5 * DIM);
        assert_eq!(fv.len(), 320);
        assert_relative_eq!(l2_norm(&fv), 1.0, epsilon = 1e-5);
        assert_eq!(fv, mixture.encode(record.descriptors(), 0.5).unwrap());
    }
}

#[test]
fn empty_image_is_rejected_by_both_encoders() {
    let store = corpus();
    let empty = Array2::<f32>::zeros((0, DIM));
    let codebook = Codebook::build_default(store.records(), 4).unwrap();
    assert!(matches!(codebook.encode(empty.view()), Err(VocabErr::EmptyInput)));
    let mixture = MixtureModel::fit_default(store.records(), 2).unwrap();
    assert!(matches!(
        encode_fisher(empty.view(), &mixture, 0.5),
        Err(VocabErr::EmptyInput)
    ));
}

#[test]
fn codebook_larger_than_corpus() {
    let store = corpus();
    assert!(matches!(
        Codebook::build_default(store.records(), 101),
        Err(VocabErr::InsufficientData {
            available: 100,
            requested: 101
        })
    ));
}

#[test]
fn mismatched_dimensions_fail_before_fitting() {
    let records = vec![
        DescriptorRecord::new("a", "x", Array2::zeros((10, 32))),
        DescriptorRecord::new("b", "x", Array2::zeros((10, 16))),
    ];
    assert!(matches!(
        Codebook::build_default(&records, 2),
        Err(VocabErr::DimensionMismatch {
            expected: 32,
            found: 16
        })
    ));
    assert!(matches!(
        MixtureModel::fit_default(&records, 2),
        Err(VocabErr::DimensionMismatch { .. })
    ));
}

#[test]
fn encoder_features_from_one_vocabulary() {
    init_logger();
    let train = corpus();
    let conf = EncoderConfig::fisher(3, 0.5).with_seed(11);
    let encoder = Encoder::build(train.records(), &conf).unwrap();
    let samples = encoder.encode_store(&train).unwrap();
    assert_eq!(samples.len(), 3);
    for s in &samples {
        assert_eq!(s.feature.len(), encoder.feature_len());
        assert_relative_eq!(l2_norm(&s.feature), 1.0, epsilon = 1e-5);
    }
    let score = samples[0].feature.l2(&samples[2].feature);
    assert!((0.0..=1.0).contains(&score));
    assert_relative_eq!(samples[0].feature.l2(&samples[0].feature), 1.0);
    assert_eq!(train.label_index(&samples[1].label), Some(1));
}

#[cfg(feature = "bincode")]
#[test]
fn saved_encoder_round_trips() {
    let store = corpus();
    let encoder = Encoder::build(store.records(), &EncoderConfig::bovw(8)).unwrap();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bovw.voc");
    encoder.save(&path).unwrap();
    let loaded = Encoder::load(&path).unwrap();
    assert_eq!(encoder, loaded);
    let d = store.records()[1].descriptors();
    assert_eq!(encoder.encode(d).unwrap(), loaded.encode(d).unwrap());
}
