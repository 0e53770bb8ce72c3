use facet::Facet;

fn main() {
    divan::main();
}

#[derive(Facet, Debug, PartialEq)]
struct Status {
    id: u64,
    text: String,
    truncated: bool,
    retweet_count: u32,
    favorited: bool,
    coordinates: Option<Vec<f64>>,
    hashtags: Vec<String>,
}

#[derive(Facet, Debug, PartialEq)]
struct Timeline {
    statuses: Vec<Status>,
}

fn fixture_json() -> String {
    let mut statuses = String::new();
    for i in 0..200 {
        if i > 0 {
            statuses.push(',');
        }
        statuses.push_str(&format!(
            r#"{{"id":{},"text":"status number {} with some <angle> text & more","truncated":false,"retweet_count":{},"favorited":true,"coordinates":[{}.5,-73.9],"hashtags":["one","two","three"]}}"#,
            9_000_000 + i,
            i,
            i % 17,
            i % 90,
        ));
    }
    format!(r#"{{"statuses":[{statuses}]}}"#)
}

#[divan::bench]
fn decode_timeline(bencher: divan::Bencher) {
    let json = fixture_json();
    // Prime the program cache so the bench measures the hot path.
    let _: Timeline = jato::from_str(&json).unwrap();
    bencher.bench(|| {
        let parsed: Timeline = jato::from_str(divan::black_box(&json)).unwrap();
        parsed
    });
}

#[divan::bench]
fn encode_timeline(bencher: divan::Bencher) {
    let json = fixture_json();
    let timeline: Timeline = jato::from_str(&json).unwrap();
    let _ = jato::to_vec(&timeline).unwrap();
    bencher.bench(|| jato::to_vec(divan::black_box(&timeline)).unwrap());
}

#[divan::bench]
fn decode_dynamic(bencher: divan::Bencher) {
    let json = fixture_json();
    let _: jato::Value = jato::from_str(&json).unwrap();
    bencher.bench(|| {
        let parsed: jato::Value = jato::from_str(divan::black_box(&json)).unwrap();
        parsed
    });
}
