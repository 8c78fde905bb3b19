use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use sr_engine::SymbolicRefiner;
use sr_types::{Matrix, RefineConfig};
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    println!("SymRefine basic fit");

    // Newtonian gravity: F = 6.67 * m1 * m2 / r^2
    let mut rng = ChaCha8Rng::seed_from_u64(42);
    let rows: Vec<Vec<f64>> = (0..200)
        .map(|_| {
            vec![
                rng.gen_range(1.0..10.0),
                rng.gen_range(1.0..10.0),
                rng.gen_range(0.5..3.0),
            ]
        })
        .collect();
    let y: Vec<f64> = rows.iter().map(|r| 6.67 * r[0] * r[1] / (r[2] * r[2])).collect();
    let x = Matrix::from_rows(&rows)?;

    // Roughly what a search would hand over: right shapes, wrong constants,
    // one degenerate and one malformed string.
    let raw = [
        "x_0*x_1",
        "5.1*x_0*x_1/x_2**2",
        "x_0*x_1/x_2 + 3.0",
        "log(x_2 - x_2) + x_0",
        "x_0 * (x_1",
    ];

    let config = RefineConfig::default()
        .with_finetune(Some(500))
        .with_rci(0.1)
        .with_random_state(7);
    let refiner = SymbolicRefiner::new(config)?;
    let model = refiner.fit(&raw, &x, &y)?;

    println!("Selected expression: {}", model.expr);
    println!("Training MSE:        {:.3e}", model.training_error);
    println!("Complexity:          {}", refiner.complexity(&model));
    println!("Summary:             {}", serde_json::to_string_pretty(&model.summary)?);

    let probe = Matrix::from_rows(&[vec![2.0, 3.0, 1.0], vec![5.0, 5.0, 2.5]])?;
    for (row, p) in refiner.predict(&model, &probe)?.iter().enumerate() {
        println!("prediction[{}] = {:.4}", row, p);
    }
    Ok(())
}
