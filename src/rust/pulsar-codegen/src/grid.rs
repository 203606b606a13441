// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

pub fn floor_to_grid(value: i64, grid: i64) -> i64 {
    value - value % grid
}

pub fn ceil_to_grid(value: i64, grid: i64) -> i64 {
    value + (grid - (value % grid)) % grid
}

pub fn is_on_grid(value: i64, grid: u16) -> bool {
    value % i64::from(grid) == 0
}

pub fn length_to_samples(t: f64, sampling_rate: f64) -> i64 {
    (t * sampling_rate).round() as i64
}
