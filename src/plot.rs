use plotters::prelude::*;

use crate::utils::DynError;

// Grayscale heatmap of a row-major buffer, used for the dirty image and for
// lag waterfalls. One image pixel per cell.
pub fn plot_heatmap(
    data: &[f64],
    width: usize,
    height: usize,
    filename: &str,
    title: &str,
) -> Result<(), DynError> {
    if width == 0 || height == 0 || data.len() != width * height {
        return Err("Heatmap dimensions do not match data length".into());
    }

    let max_val = data.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let min_val = data.iter().cloned().fold(f64::INFINITY, f64::min);
    let span = if max_val > min_val {
        max_val - min_val
    } else {
        1.0
    };

    let root = BitMapBackend::new(filename, (width as u32, height as u32 + 24)).into_drawing_area();
    root.fill(&WHITE)?;
    let (title_area, plot_area) = root.split_vertically(24);
    title_area.draw_text(
        title,
        &TextStyle::from(("sans-serif", 16)).color(&BLACK),
        (4, 4),
    )?;

    for (idx, &value) in data.iter().enumerate() {
        let x = (idx % width) as i32;
        let y = (idx / width) as i32;
        let level = (255.0 * (value - min_val) / span) as u8;
        let color = RGBColor(level, level, level);
        plot_area.draw_pixel((x, y), &color)?;
    }
    root.present()?;
    Ok(())
}

// Line chart of one value per reporting window, e.g. a line's pulse rate
// over the run.
pub fn plot_series(
    data: &[f64],
    filename: &str,
    x_label: &str,
    y_label: &str,
    label: &str,
) -> Result<(), DynError> {
    if data.is_empty() {
        return Err("No data points to plot".into());
    }

    let min_val = data.iter().cloned().fold(f64::INFINITY, f64::min);
    let max_val = data.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let (y_min, y_max) = if max_val > min_val {
        (min_val, max_val)
    } else {
        (min_val - 1.0, max_val + 1.0)
    };

    let root = BitMapBackend::new(filename, (1280, 720)).into_drawing_area();
    root.fill(&WHITE)?;

    let mut chart = ChartBuilder::on(&root)
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(60)
        .build_cartesian_2d(0f64..(data.len() - 1).max(1) as f64, y_min..y_max)?;

    chart
        .configure_mesh()
        .x_desc(x_label)
        .y_desc(y_label)
        .draw()?;

    chart
        .draw_series(LineSeries::new(
            data.iter().enumerate().map(|(i, &v)| (i as f64, v)),
            &BLUE,
        ))?
        .label(label)
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], BLUE));

    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()?;

    root.present()?;
    Ok(())
}
