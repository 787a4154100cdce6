//! Benchmarks for the culinary topic gate.
//!
//! The gate runs on every submitted question before anything else, so it
//! must stay well under a millisecond even for long inputs.

use std::time::Duration;

use criterion::{criterion_group, criterion_main, Criterion};
use dapur_chat::classifier::TopicClassifier;
use dapur_core::config::GateConfig;

/// A question of realistic length; even indices are culinary.
fn generate_question(index: usize) -> String {
    match index % 4 {
        0 => format!(
            "Halo chef, bagaimana cara membuat rendang yang empuk untuk {} orang? \
             Saya ingin tahu berapa lama dagingnya harus dimasak.",
            index
        ),
        1 => format!(
            "Can you summarize the history of the Roman empire in {} sentences \
             and list the most important emperors?",
            index
        ),
        2 => format!(
            "What are the ingredients for a traditional Indonesian dish that \
             feeds {} people?",
            index
        ),
        _ => format!(
            "Tolong jelaskan perbedaan antara protokol TCP dan UDP untuk tugas \
             nomor {} minggu ini.",
            index
        ),
    }
}

fn bench_classify(c: &mut Criterion) {
    let classifier = match TopicClassifier::new(&GateConfig::default()) {
        Ok(classifier) => classifier,
        Err(e) => panic!("default gate config must compile: {e}"),
    };
    let questions: Vec<String> = (0..1000).map(generate_question).collect();
    let long_off_topic = generate_question(1).repeat(50);

    let mut group = c.benchmark_group("topic_gate");
    group.sample_size(200);
    group.measurement_time(Duration::from_secs(5));

    group.bench_function("mixed_questions", |b| {
        let mut idx = 0usize;
        b.iter(|| {
            let decision = classifier.classify(&questions[idx % questions.len()]);
            idx += 1;
            decision
        });
    });

    // Off-topic input scans every keyword and every pattern.
    group.bench_function("long_off_topic", |b| {
        b.iter(|| classifier.classify(&long_off_topic));
    });

    group.finish();
}

fn bench_construction(c: &mut Criterion) {
    let config = GateConfig::default();
    c.bench_function("topic_gate_construction", |b| {
        b.iter(|| TopicClassifier::new(&config).is_ok());
    });
}

criterion_group!(benches, bench_classify, bench_construction);
criterion_main!(benches);
