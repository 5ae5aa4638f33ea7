use criterion::*;
use pullxml_reader::{Reader, ReaderOptions};

/// A document of `n` records against an internal subset, with entity references and defaulted
/// attributes
fn document(n: usize) -> String {
    let mut text = String::from(
        "<?xml version=\"1.0\"?>\n\
         <!DOCTYPE catalog [\n\
         <!ELEMENT catalog (record*)>\n\
         <!ELEMENT record (title, price?)>\n\
         <!ATTLIST record id ID #REQUIRED status (new|used) \"new\">\n\
         <!ELEMENT title (#PCDATA)>\n\
         <!ELEMENT price (#PCDATA)>\n\
         <!ENTITY co \"Example Company\">\n\
         ]>\n<catalog>\n",
    );
    for i in 0..n {
        text.push_str(&format!(
            "  <record id=\"r{i}\">\n    <title>Item {i} from &co;</title>\n    <price>{i}.99</price>\n  </record>\n",
            i = i
        ));
    }
    text.push_str("</catalog>\n");
    text
}

fn stream(c: &mut Criterion) {
    let mut group = c.benchmark_group("stream");
    let text = document(1000);
    group.throughput(Throughput::Bytes(text.len() as u64));
    for (name, options) in [
        ("plain", ReaderOptions::default()),
        ("reference", ReaderOptions::reference()),
    ] {
        group.bench_function(name, |b| {
            b.iter(|| {
                let mut reader = Reader::from_str(&text, options.clone()).expect("Reader::from_str()");
                let mut count = 0;
                while reader.advance() {
                    count += 1;
                }
                assert!(reader.error().is_none());
                count
            });
        });
    }
    group.finish();
}

criterion_group!(benches, stream);
criterion_main!(benches);
