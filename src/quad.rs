use anyhow::Result;

/// Abscissas and weights for n-point Gauss-Legendre quadrature, n in [1, 9].
fn nodes(n: usize) -> Result<(&'static [f64], &'static [f64])> {
    // n = 5 first: it is the workhorse for the daily integrals
    const T5: [f64; 5] = [-0.90617985, -0.53846931, 0.0, 0.53846931, 0.90617985];
    const W5: [f64; 5] = [0.23692689, 0.47862867, 0.56888888, 0.47862867, 0.23692689];
    const T3: [f64; 3] = [-0.77459667, 0.0, 0.77459667];
    const W3: [f64; 3] = [0.55555556, 0.88888889, 0.55555556];
    const T7: [f64; 7] = [
        -0.94910791, -0.74153119, -0.40584515, 0.0, 0.40584515, 0.74153119, 0.94910791,
    ];
    const W7: [f64; 7] = [
        0.12948497, 0.27970539, 0.38183005, 0.41795918, 0.38183005, 0.27970539, 0.12948497,
    ];
    const T9: [f64; 9] = [
        -0.96816024,
        -0.83603111,
        -0.61337143,
        -0.32425342,
        0.0,
        0.32425342,
        0.61337143,
        0.83603111,
        0.96816024,
    ];
    const W9: [f64; 9] = [
        0.08127439, 0.18064816, 0.2606107, 0.31234708, 0.33023936, 0.31234708, 0.2606107,
        0.18064816, 0.08127439,
    ];
    const T2: [f64; 2] = [-0.57735027, 0.57735027];
    const W2: [f64; 2] = [1.0, 1.0];
    const T4: [f64; 4] = [-0.86113631, -0.33998104, 0.33998104, 0.86113631];
    const W4: [f64; 4] = [0.34785485, 0.65214515, 0.65214515, 0.34785485];
    const T6: [f64; 6] = [
        -0.93246951, -0.66120939, -0.23861919, 0.23861919, 0.66120939, 0.93246951,
    ];
    const W6: [f64; 6] = [
        0.17132449, 0.36076157, 0.46791393, 0.46791393, 0.36076157, 0.17132449,
    ];
    const T8: [f64; 8] = [
        -0.96028986, -0.79666648, -0.52553241, -0.18343464, 0.18343464, 0.52553241, 0.79666648,
        0.96028986,
    ];
    const W8: [f64; 8] = [
        0.10122854, 0.22238103, 0.31370665, 0.36268378, 0.36268378, 0.31370665, 0.22238103,
        0.10122854,
    ];
    const T1: [f64; 1] = [0.0];
    const W1: [f64; 1] = [2.0];

    Ok(match n {
        5 => (&T5, &W5),
        3 => (&T3, &W3),
        7 => (&T7, &W7),
        9 => (&T9, &W9),
        2 => (&T2, &W2),
        4 => (&T4, &W4),
        6 => (&T6, &W6),
        8 => (&T8, &W8),
        1 => (&T1, &W1),
        _ => anyhow::bail!("Gaussian integration requires n in [1, 9], got {n}"),
    })
}

/// N-point Gaussian integration of a K-component integrand over [lower, upper].
///
/// The integrand may carry mutable state (e.g. it re-points the meteorology to
/// the quadrature hour before evaluating), so it is `FnMut` and fallible.
pub fn integrate<const K: usize>(
    n: usize,
    lower: f64,
    upper: f64,
    mut f: impl FnMut(f64) -> Result<[f64; K]>,
) -> Result<[f64; K]> {
    let (t, w) = nodes(n)?;
    let mid = (upper + lower) / 2.0;
    let half = (upper - lower) / 2.0;
    let mut total = [0.0; K];
    for i in 0..n {
        let x = mid + half * t[i];
        let vals = f(x)?;
        for k in 0..K {
            total[k] += vals[k] * w[i] * half;
        }
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_polynomial_exact() {
        // 3-point Gauss is exact for degree <= 5
        let got = integrate(3, 0.0, 2.0, |x| Ok([x * x, x * x * x])).unwrap();
        assert!((got[0] - 8.0 / 3.0).abs() < 1e-6);
        assert!((got[1] - 4.0).abs() < 1e-6);
    }

    #[test]
    fn test_five_point_sine() {
        let got = integrate(5, 0.0, std::f64::consts::PI, |x| Ok([x.sin()])).unwrap();
        assert!((got[0] - 2.0).abs() < 1e-5);
    }

    #[test]
    fn test_all_orders_constant() {
        for n in 1..=9 {
            let got = integrate(n, -1.0, 3.0, |_| Ok([2.5])).unwrap();
            assert!((got[0] - 10.0).abs() < 1e-6, "n = {n}");
        }
    }

    #[test]
    fn test_bad_order_rejected() {
        assert!(integrate(0, 0.0, 1.0, |_| Ok([0.0])).is_err());
        assert!(integrate(10, 0.0, 1.0, |_| Ok([0.0])).is_err());
    }
}
