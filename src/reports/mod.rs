use comfy_table::presets::ASCII_FULL;
use comfy_table::{Attribute, Cell, CellAlignment, Color, ContentArrangement, Table};
use itertools::Itertools;
use optobot::config::ExperimentConfig;
use optobot::optimizer::SearchOutcome;
use optobot::store::ExperimentStore;
use optobot::OptResult;

/// One row per iteration: which plate, which wells, which table rows.
pub fn print_plan(config: &ExperimentConfig, iterations: usize) -> OptResult<()> {
    let mapper = config.mapper();

    println!(
        "\n🧫 {} plate(s) of {}x{}, {} wells per iteration, {} of {} wells used",
        config.plate_count(),
        config.plate_rows,
        config.plate_columns,
        config.batch_size,
        iterations * config.batch_size,
        config.capacity()
    );

    let mut table = Table::new();
    table
        .load_preset(ASCII_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("Iter").add_attribute(Attribute::Bold),
        Cell::new("Start"),
        Cell::new("Slot").fg(Color::Cyan),
        Cell::new("Row"),
        Cell::new("Wells"),
        Cell::new("Table Rows"),
    ]);

    for iteration in 0..iterations {
        let anchor = mapper.anchor(iteration);
        let wells = mapper.resolve_iteration(iteration)?;
        let slots = mapper
            .plates_in_iteration(iteration)?
            .iter()
            .map(|&p| config.plate_locations[p])
            .join("+");
        let rows = wells.iter().map(|w| w.table_row).dedup().join(",");
        let names = match (wells.first(), wells.last()) {
            (Some(a), Some(b)) => format!("{} .. {}", a.name(), b.name()),
            _ => String::new(),
        };

        table.add_row(vec![
            Cell::new(iteration).add_attribute(Attribute::Bold),
            Cell::new(anchor.start_index),
            Cell::new(slots).fg(Color::Cyan),
            Cell::new(anchor.row_offset),
            Cell::new(names),
            Cell::new(rows),
        ]);
    }

    for i in [1, 3] {
        if let Some(col) = table.column_mut(i) {
            col.set_cell_alignment(CellAlignment::Right);
        }
    }
    println!("{}", table);
    Ok(())
}

/// Best and mean error of every committed iteration, then the best recipe.
pub fn print_summary(
    config: &ExperimentConfig,
    store: &ExperimentStore,
    outcome: Option<&SearchOutcome>,
) {
    let all_data = store.all_data();
    let error_col = all_data.width() - 1;
    let committed = store.committed_iterations();

    let mut table = Table::new();
    table
        .load_preset(ASCII_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("Iter").add_attribute(Attribute::Bold),
        Cell::new("Best").fg(Color::Green),
        Cell::new("Mean"),
        Cell::new("Best Recipe"),
    ]);

    for iteration in 0..committed {
        let rows: Vec<&[f64]> = iteration_rows(store, iteration)
            .into_iter()
            .filter(|r| r[error_col].is_finite())
            .collect();
        let Some(best) = rows
            .iter()
            .min_by(|a, b| a[error_col].total_cmp(&b[error_col]))
            .copied()
        else {
            table.add_row(vec![
                Cell::new(iteration).add_attribute(Attribute::Bold),
                Cell::new("-"),
                Cell::new("-"),
                Cell::new("unusable (dispense interrupted)").fg(Color::Red),
            ]);
            continue;
        };
        let mean = rows.iter().map(|r| r[error_col]).sum::<f64>() / rows.len() as f64;
        let recipe = config
            .liquid_names
            .iter()
            .zip(&best[1..=config.num_liquids()])
            .map(|(name, v)| format!("{} {:.1}", name, v))
            .join(", ");

        table.add_row(vec![
            Cell::new(iteration).add_attribute(Attribute::Bold),
            Cell::new(format!("{:.4}", best[error_col])).fg(Color::Green),
            Cell::new(format!("{:.4}", mean)),
            Cell::new(recipe),
        ]);
    }
    for i in 1..=2 {
        if let Some(col) = table.column_mut(i) {
            col.set_cell_alignment(CellAlignment::Right);
        }
    }

    println!("\n📊 Experiment summary ({} iterations)", committed);
    println!("{}", table);

    if let Some(o) = outcome {
        println!(
            "🏆 Best error {:.4} at [{}] after {} evaluations",
            o.best_score,
            o.best_params.iter().map(|v| format!("{:.2}", v)).join(", "),
            o.evaluations
        );
    }
    println!("📂 Data in {}", store.dir().display());
}

fn iteration_rows(store: &ExperimentStore, iteration: usize) -> Vec<&[f64]> {
    store
        .mapper()
        .window(iteration)
        .filter(|&i| i < store.all_data().rows())
        .map(|i| store.all_data().row(i))
        .collect()
}
