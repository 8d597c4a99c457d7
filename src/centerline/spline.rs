use nalgebra::{Point3, Vector3};

/// Natural cubic spline through `(x_i, y_i)` with zero second derivative at both
/// ends. Knots must be strictly increasing. Evaluation outside the knot range
/// clamps to the end knots.
#[derive(Debug, Clone, PartialEq)]
pub struct NaturalCubicSpline {
    xs: Vec<f64>,
    ys: Vec<f64>,
    // second derivatives at the knots
    m: Vec<f64>,
}

impl NaturalCubicSpline {
    /// Returns `None` for fewer than two knots or non-increasing knots.
    pub fn new(xs: &[f64], ys: &[f64]) -> Option<Self> {
        let n = xs.len();
        if n < 2 || ys.len() != n {
            return None;
        }
        if xs.windows(2).any(|w| !(w[1] > w[0])) {
            return None;
        }

        let mut m = vec![0.0; n];
        if n > 2 {
            // Thomas algorithm on the interior equations
            let inner = n - 2;
            let mut diag = vec![0.0; inner];
            let mut upper = vec![0.0; inner];
            let mut rhs = vec![0.0; inner];
            for k in 0..inner {
                let i = k + 1;
                let h0 = xs[i] - xs[i - 1];
                let h1 = xs[i + 1] - xs[i];
                diag[k] = 2.0 * (h0 + h1);
                upper[k] = h1;
                rhs[k] = 6.0 * ((ys[i + 1] - ys[i]) / h1 - (ys[i] - ys[i - 1]) / h0);
            }
            for k in 1..inner {
                let lower = xs[k + 1] - xs[k];
                let w = lower / diag[k - 1];
                diag[k] -= w * upper[k - 1];
                rhs[k] -= w * rhs[k - 1];
            }
            m[inner] = rhs[inner - 1] / diag[inner - 1];
            for k in (0..inner - 1).rev() {
                m[k + 1] = (rhs[k] - upper[k] * m[k + 2]) / diag[k];
            }
        }

        Some(NaturalCubicSpline {
            xs: xs.to_vec(),
            ys: ys.to_vec(),
            m,
        })
    }

    pub fn knots(&self) -> &[f64] {
        &self.xs
    }

    fn segment(&self, x: f64) -> (usize, f64, f64, f64) {
        let n = self.xs.len();
        let x = x.clamp(self.xs[0], self.xs[n - 1]);
        let i = self.xs.partition_point(|k| *k <= x).clamp(1, n - 1) - 1;
        let h = self.xs[i + 1] - self.xs[i];
        let a = (self.xs[i + 1] - x) / h;
        let b = (x - self.xs[i]) / h;
        (i, h, a, b)
    }

    pub fn value(&self, x: f64) -> f64 {
        let (i, h, a, b) = self.segment(x);
        a * self.ys[i]
            + b * self.ys[i + 1]
            + ((a * a * a - a) * self.m[i] + (b * b * b - b) * self.m[i + 1]) * h * h / 6.0
    }

    pub fn derivative(&self, x: f64) -> f64 {
        let (i, h, a, b) = self.segment(x);
        (self.ys[i + 1] - self.ys[i]) / h - (3.0 * a * a - 1.0) / 6.0 * h * self.m[i]
            + (3.0 * b * b - 1.0) / 6.0 * h * self.m[i + 1]
    }

    pub fn second_derivative(&self, x: f64) -> f64 {
        let (i, _, a, b) = self.segment(x);
        a * self.m[i] + b * self.m[i + 1]
    }
}

/// Three independent natural splines sharing one parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct Spline3 {
    x: NaturalCubicSpline,
    y: NaturalCubicSpline,
    z: NaturalCubicSpline,
}

impl Spline3 {
    pub fn new(params: &[f64], points: &[Point3<f64>]) -> Option<Self> {
        let xs: Vec<f64> = points.iter().map(|p| p.x).collect();
        let ys: Vec<f64> = points.iter().map(|p| p.y).collect();
        let zs: Vec<f64> = points.iter().map(|p| p.z).collect();
        Some(Spline3 {
            x: NaturalCubicSpline::new(params, &xs)?,
            y: NaturalCubicSpline::new(params, &ys)?,
            z: NaturalCubicSpline::new(params, &zs)?,
        })
    }

    pub fn point(&self, t: f64) -> Point3<f64> {
        Point3::new(self.x.value(t), self.y.value(t), self.z.value(t))
    }

    pub fn derivative(&self, t: f64) -> Vector3<f64> {
        Vector3::new(
            self.x.derivative(t),
            self.y.derivative(t),
            self.z.derivative(t),
        )
    }

    pub fn second_derivative(&self, t: f64) -> Vector3<f64> {
        Vector3::new(
            self.x.second_derivative(t),
            self.y.second_derivative(t),
            self.z.second_derivative(t),
        )
    }
}
