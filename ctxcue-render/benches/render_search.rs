use ctxcue_core::{Corner, Glyph, GridCell, PlacedItem, SearchDisplay, SessionPhase, TargetShape, TrialState};
use ctxcue_render::{FrameContent, SkiaRenderer};
use ctxcue_timing::HighPrecisionTimer;
use criterion::{BatchSize, Criterion, black_box, criterion_group, criterion_main};

fn display() -> SearchDisplay {
    let mut items: Vec<PlacedItem> = (0..11)
        .map(|i| PlacedItem {
            cell: GridCell::new(i % 8, i / 2),
            glyph: Glyph::Distractor(Corner::ALL[i as usize % 4]),
            color: i as usize % 4,
        })
        .collect();
    items.push(PlacedItem {
        cell: GridCell::new(5, 5),
        glyph: Glyph::Target(TargetShape::Right),
        color: 2,
    });
    SearchDisplay { items }
}

fn harness() -> (SkiaRenderer, Vec<u8>, HighPrecisionTimer) {
    let (width, height) = (1280u32, 720u32);
    let r = SkiaRenderer::new(width, height, 50.0, None).expect("renderer");
    let fb = vec![0u8; (width * height * 4) as usize];
    (r, fb, HighPrecisionTimer::new())
}

pub fn bench_search_frame(c: &mut Criterion) {
    let mut g = c.benchmark_group("render_search");
    g.sample_size(40);
    let display = display();

    g.bench_function("first_frame", |b| {
        b.iter_batched(
            harness,
            |(mut r, mut fb, t)| {
                let stats = r.render_frame(
                    &SessionPhase::Search,
                    &FrameContent {
                        display: Some(&display),
                        trial_state: Some(&TrialState::Search),
                        message: None,
                    },
                    &mut fb,
                    &t,
                );
                black_box(stats)
            },
            BatchSize::LargeInput,
        )
    });

    g.bench_function("steady_state", |b| {
        let (mut r, mut fb, t) = harness();
        let content = FrameContent {
            display: Some(&display),
            trial_state: Some(&TrialState::Search),
            message: None,
        };
        b.iter(|| black_box(r.render_frame(&SessionPhase::Search, &content, &mut fb, &t)))
    });

    g.finish();
}

criterion_group!(benches, bench_search_frame);
criterion_main!(benches);
