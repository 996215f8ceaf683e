use scrapeline_core::{AttrValue, Attributes, content_hash, normalize_identity};

fn sample_identities() -> Vec<String> {
    (0..1_000)
        .map(|i| match i % 4 {
            0 => format!("https://www.Shop-{i}.example.com/listing/{i}/"),
            1 => format!("http://shop-{i}.example.com/listing/{i}"),
            2 => format!("  SHOP-{i}.EXAMPLE.COM/listing/{i}//  "),
            _ => format!("//www.shop-{i}.example.com"),
        })
        .collect()
}

#[divan::bench]
fn normalize(bencher: divan::Bencher) {
    let ids = sample_identities();
    bencher.bench(|| {
        for id in &ids {
            divan::black_box(normalize_identity(id));
        }
    });
}

#[divan::bench]
fn hash_attributes(bencher: divan::Bencher) {
    let attrs: Attributes = (0..24)
        .map(|i| {
            let value = match i % 3 {
                0 => AttrValue::Text(format!("value {i}")),
                1 => AttrValue::Integer(i),
                _ => AttrValue::Float(i as f64 * 0.5),
            };
            (format!("field_{i}"), value)
        })
        .collect();
    bencher.bench(|| divan::black_box(content_hash(&attrs)));
}

fn main() {
    divan::main();
}
