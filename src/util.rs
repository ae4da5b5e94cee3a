//! Small utility helpers used across modules.

/// Integer percentage `done / total`, rounded half up and capped at 100.
/// A zero total yields 0.
pub fn percent(done: usize, total: usize) -> u8 {
  if total == 0 {
    return 0;
  }
  let done = done.min(total) as u64;
  let total = total as u64;
  ((done * 200 + total) / (total * 2)) as u8
}

/// Clamp an arbitrary wire number into a 0..=100 percentage.
/// NaN is treated as 0.
pub fn clamp_percent(value: f64) -> u8 {
  if value.is_nan() {
    return 0;
  }
  value.round().clamp(0.0, 100.0) as u8
}

/// Log-safe truncation for large strings.
/// Avoids spamming logs with huge request/response payloads.
pub fn trunc_for_log(s: &str, max: usize) -> String {
  if s.len() <= max {
    return s.to_string();
  }
  let mut cut = max;
  while !s.is_char_boundary(cut) {
    cut -= 1;
  }
  format!("{}… ({} bytes total)", &s[..cut], s.len())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn percent_rounds_half_up() {
    assert_eq!(percent(1, 2), 50);
    assert_eq!(percent(1, 3), 33);
    assert_eq!(percent(2, 3), 67);
    assert_eq!(percent(1, 8), 13);
    assert_eq!(percent(0, 0), 0);
    assert_eq!(percent(5, 4), 100);
  }

  #[test]
  fn clamp_percent_handles_out_of_range() {
    assert_eq!(clamp_percent(-3.0), 0);
    assert_eq!(clamp_percent(42.4), 42);
    assert_eq!(clamp_percent(250.0), 100);
    assert_eq!(clamp_percent(f64::NAN), 0);
  }

  #[test]
  fn trunc_for_log_respects_char_boundaries() {
    assert_eq!(trunc_for_log("short", 10), "short");
    let out = trunc_for_log("ééééé", 3);
    assert!(out.starts_with('é'));
    assert!(out.ends_with("(10 bytes total)"));
  }
}
