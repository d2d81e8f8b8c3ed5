// Copyright (C) 2026 Brian Johnson
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

use std::io::Write;
use std::time::Instant;

/// Transfer rate and ETA for the console status line.
pub struct Progress {
    total: u64,
    done: u64,
    start: Instant,
}

impl Progress {
    pub fn new(total: u64) -> Self {
        Progress::started_at(total, Instant::now())
    }

    fn started_at(total: u64, start: Instant) -> Self {
        Progress { total, done: 0, start }
    }

    pub fn advance(&mut self, delta: u64) {
        self.done += delta;
        print!("{}\r", self.render(Instant::now()));
        std::io::stdout().flush().ok();
    }

    pub fn finish(&self) {
        println!();
    }

    fn render(&self, now: Instant) -> String {
        let elapsed = now.duration_since(self.start).as_secs_f64();
        let rate = if elapsed > 0.0 { self.done as f64 / elapsed / 1024.0 } else { 0.0 };
        let percent = if self.total > 0 {
            self.done as f64 / self.total as f64 * 100.0
        } else {
            100.0
        };
        let eta = if self.done > 0 {
            elapsed * self.total.saturating_sub(self.done) as f64 / self.done as f64
        } else {
            0.0
        };

        format!(
            "{:.3} KiB/sec; {:.2}%; ETA: {:.3}sec; passed: {:.3}sec  ",
            rate, percent, eta, elapsed
        )
    }

    #[cfg(test)]
    fn render_after(&self, elapsed: std::time::Duration) -> String {
        self.render(self.start + elapsed)
    }
}
