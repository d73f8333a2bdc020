use fvbow::*;
use ndarray::Array2;
use rand::{rngs::StdRng, Rng, SeedableRng};

// Three "classes" of images, each made of descriptors around its own set of
// centers, standing in for the output of a real keypoint extractor.
fn image(rng: &mut StdRng, centers: &Array2<f32>, rows: usize) -> Array2<f32> {
    Array2::from_shape_fn((rows, centers.ncols()), |(r, c)| {
        centers[[r % centers.nrows(), c]] + rng.gen_range(-0.1..0.1)
    })
}

fn main() {
    env_logger::init();

    let mut rng = StdRng::seed_from_u64(1);
    let classes: Vec<(String, Array2<f32>)> = ["forest", "street", "beach"]
        .iter()
        .map(|name| {
            let centers = Array2::from_shape_fn((4, 16), |_| rng.gen_range(0.0..1.0));
            (name.to_string(), centers)
        })
        .collect();

    let mut train = DescriptorStore::new();
    let mut test = DescriptorStore::new();
    for i in 0..12 {
        let (label, centers) = &classes[i % classes.len()];
        let rows = rng.gen_range(40..80);
        let record = DescriptorRecord::new(format!("{}_{:02}", label, i), label.clone(), image(&mut rng, centers, rows));
        if i < 9 {
            train.push(record).unwrap();
        } else {
            test.push(record).unwrap();
        }
    }
    println!("Labels: {:?}", train.labels());

    for conf in [EncoderConfig::bovw(12), EncoderConfig::fisher(6, 0.5)] {
        // Build once from the training images, reuse for the test images
        let encoder = Encoder::build(train.records(), &conf).unwrap();
        if let Vocabulary::Hard(cb) = encoder.vocabulary() {
            println!("\nCodebook = {:#?}", cb);
        }

        // Save encoder and load it again just for fun
        encoder.save("synthetic.voc").unwrap();
        let encoder = Encoder::load("synthetic.voc").unwrap();

        let train_features = encoder.encode_store(&train).unwrap();
        let test_features = encoder.encode_store(&test).unwrap();

        println!("\n{:?} features of length {}", conf.kind, encoder.feature_len());
        for t in test_features.iter() {
            let best = train_features
                .iter()
                .map(|s| (t.feature.l2(&s.feature), s))
                .max_by(|a, b| a.0.partial_cmp(&b.0).unwrap())
                .unwrap();
            println!(
                "{:>10} ({:>6}) best match {:>10} ({:>6}) score {:.4}",
                t.source_id, t.label, best.1.source_id, best.1.label, best.0
            );
        }
    }
    std::fs::remove_file("synthetic.voc").ok();
}
