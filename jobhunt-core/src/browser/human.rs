use std::time::Duration;

use rand::distributions::{Distribution, Uniform};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::time::sleep;

use chromiumoxide::element::Element;
use chromiumoxide::layout::Point;
use chromiumoxide::page::Page;

use crate::config::HumanSimulationSection;

use super::error::{BrowserError, BrowserResult};

/// Drives mouse, keyboard and scroll input at human pace. Application forms
/// sit behind bot heuristics that flag instant clicks and paste-speed typing,
/// so every interaction goes through here.
#[derive(Debug)]
pub struct HumanMotion {
    config: HumanSimulationSection,
    last_point: Option<Point>,
    rng: StdRng,
}

impl HumanMotion {
    pub fn new(config: HumanSimulationSection) -> Self {
        Self {
            config,
            last_point: None,
            rng: StdRng::from_entropy(),
        }
    }

    /// Moves the cursor to a random spot inside the element along an eased
    /// path, then returns the final point.
    pub async fn move_to_element(
        &mut self,
        page: &Page,
        element: &Element,
    ) -> BrowserResult<Point> {
        let bbox = element.bounding_box().await.map_err(|err| {
            BrowserError::Unexpected(format!("failed to get element bounding box: {err}"))
        })?;
        let fraction_x = self.rng.gen_range(0.3..0.7);
        let fraction_y = self.rng.gen_range(0.2..0.6);
        let target = Point::new(
            bbox.x + fraction_x * bbox.width + self.jitter_within(2.0),
            bbox.y + fraction_y * bbox.height + self.jitter_within(2.0),
        );
        self.glide_to(page, target).await?;
        self.last_point = Some(target);
        Ok(target)
    }

    pub async fn click_element(&mut self, page: &Page, element: &Element) -> BrowserResult<()> {
        self.move_to_element(page, element).await?;
        sleep(self.millis_between(self.config.click_hesitation_ms)).await;
        element
            .click()
            .await
            .map_err(|err| BrowserError::Unexpected(format!("click failed: {err}")))?;
        sleep(self.millis_between(self.config.click_duration_ms)).await;
        Ok(())
    }

    /// Clears the field and types `text` at configured cadence. Most form
    /// fields carry autofill placeholders that must not survive into the
    /// submitted value.
    pub async fn type_text(
        &mut self,
        page: &Page,
        element: &Element,
        text: &str,
    ) -> BrowserResult<()> {
        self.click_element(page, element).await?;
        element
            .call_js_fn("function() { this.value = ''; }", false)
            .await
            .map_err(|err| {
                BrowserError::Unexpected(format!("failed to clear field before typing: {err}"))
            })?;
        for ch in text.chars() {
            element
                .type_str(ch.to_string())
                .await
                .map_err(|err| BrowserError::Unexpected(format!("keystroke failed: {err}")))?;
            sleep(self.typing_delay()).await;
        }
        Ok(())
    }

    /// One burst of smooth scrolling followed by a reading pause.
    pub async fn scroll_burst(&mut self, page: &Page) -> BrowserResult<()> {
        let [scroll_low, scroll_high] = self.config.scroll_burst_px;
        let delta = self.rng.gen_range(scroll_low..=scroll_high);
        let js = format!("window.scrollBy({{ top: {delta}, behavior: 'smooth' }});");
        page.evaluate(js.as_str())
            .await
            .map_err(|err| BrowserError::Unexpected(format!("scroll script failed: {err}")))?;
        sleep(self.millis_between(self.config.scroll_pause_ms)).await;
        Ok(())
    }

    /// Random pause drawn from `bounds`, the idle beat between agent steps.
    pub async fn pause_between(&mut self, bounds: [u32; 2]) -> BrowserResult<()> {
        sleep(self.millis_between(bounds)).await;
        Ok(())
    }

    async fn glide_to(&mut self, page: &Page, target: Point) -> BrowserResult<()> {
        let start = self.last_point.unwrap_or_else(|| Point::new(0.0, 0.0));
        let dx = target.x - start.x;
        let dy = target.y - start.y;
        let distance = (dx * dx + dy * dy).sqrt();
        let travel_secs = (distance / 900.0).clamp(0.08, 0.9);
        let steps = (travel_secs * 60.0).clamp(12.0, 48.0) as usize;
        let pace = Duration::from_secs_f64(travel_secs / steps as f64);
        for idx in 0..steps {
            let eased = ease_in_out_cubic(idx as f64 / steps as f64);
            let waypoint = Point::new(
                start.x + dx * eased + self.jitter_within(1.2),
                start.y + dy * eased + self.jitter_within(1.2),
            );
            page.move_mouse(waypoint)
                .await
                .map_err(|err| BrowserError::Unexpected(format!("mouse move failed: {err}")))?;
            sleep(pace).await;
        }
        Ok(())
    }

    fn typing_delay(&mut self) -> Duration {
        let [cpm_low, cpm_high] = self.config.typing_cadence_cpm;
        let cadence = self.rng.gen_range(cpm_low..=cpm_high).max(60);
        let per_char_ms = 60_000.0 / cadence as f64;
        let [jitter_low, jitter_high] = self.config.typing_jitter_ms;
        let jitter_ms = self.rng.gen_range(jitter_low..=jitter_high) as f64;
        Duration::from_secs_f64((per_char_ms + jitter_ms) / 1000.0)
    }

    fn millis_between(&mut self, bounds: [u32; 2]) -> Duration {
        Duration::from_millis(self.rng.gen_range(bounds[0]..=bounds[1]) as u64)
    }

    fn jitter_within(&mut self, max: f64) -> f64 {
        if max <= 0.0 {
            return 0.0;
        }
        Uniform::new_inclusive(-max, max).sample(&mut self.rng)
    }
}

fn ease_in_out_cubic(t: f64) -> f64 {
    if t < 0.5 {
        4.0 * t.powi(3)
    } else {
        let tail = 2.0 - 2.0 * t;
        1.0 - tail.powi(3) / 2.0
    }
}

#[cfg(test)]
mod tests {
    use super::ease_in_out_cubic;

    #[test]
    fn easing_is_monotonic_and_bounded() {
        let mut previous = 0.0;
        for step in 0..=20 {
            let t = step as f64 / 20.0;
            let value = ease_in_out_cubic(t);
            assert!(value >= previous - 1e-9, "easing regressed at t={t}");
            assert!((0.0..=1.0).contains(&value));
            previous = value;
        }
        assert!(ease_in_out_cubic(0.0).abs() < 1e-9);
        assert!((ease_in_out_cubic(1.0) - 1.0).abs() < 1e-9);
    }
}
