use criterion::{BatchSize, Criterion, criterion_group, criterion_main};
use dochandler::processor::TaskQueue;
use dochandler::{Task, TaskKind, TaskOutput};
use std::hint::black_box;

fn filled_queue(count: usize) -> TaskQueue {
    let queue = TaskQueue::new();
    for i in 0..count {
        let task = Task::new(TaskKind::Conversion, || Ok(TaskOutput::Empty)).with_priority((i % 7) as i32);
        queue.enqueue(task);
    }
    queue
}

fn bench_enqueue(c: &mut Criterion) {
    c.bench_function("enqueue_1000", |b| b.iter(|| black_box(filled_queue(1000))));
}

fn bench_dequeue(c: &mut Criterion) {
    c.bench_function("dequeue_1000", |b| {
        b.iter_batched(
            || filled_queue(1000),
            |queue| {
                while let Some(task) = queue.try_dequeue() {
                    black_box(task);
                }
            },
            BatchSize::SmallInput,
        )
    });
}

criterion_group!(benches, bench_enqueue, bench_dequeue);
criterion_main!(benches);
