//! Butcher tableaus of the seven-stage FSAL embedded pairs.

/// How an accepted step builds its dense output from the stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DenseKind {
    /// Quartic through the endpoints and Shampine's midpoint estimate.
    DormandPrince,
    /// Tsitouras' stage-weight polynomials.
    Tsitouras,
}

/// Stage `s` (0-based) is evaluated at `t0 + c[s] * h` with state
/// `y0 + h * sum_j a[s][j] * k_j`. The last stage sits at `(t0 + h, y1)`
/// so it doubles as the first stage of the next step.
#[derive(Debug)]
pub(crate) struct ButcherTableau {
    pub c: [f64; 7],
    pub a: [&'static [f64]; 6],
    /// Propagated (fifth order) solution weights.
    pub b: [f64; 7],
    /// `b - b_hat`: weights of the local error estimate.
    pub e: [f64; 7],
    /// Exponent order for step size control.
    pub error_order: usize,
    pub dense: DenseKind,
}

pub(crate) static DORMAND_PRINCE: ButcherTableau = ButcherTableau {
    c: [0.0, 1.0 / 5.0, 3.0 / 10.0, 4.0 / 5.0, 8.0 / 9.0, 1.0, 1.0],
    a: [
        &[],
        &[1.0 / 5.0],
        &[3.0 / 40.0, 9.0 / 40.0],
        &[44.0 / 45.0, -56.0 / 15.0, 32.0 / 9.0],
        &[19372.0 / 6561.0, -25360.0 / 2187.0, 64448.0 / 6561.0, -212.0 / 729.0],
        &[
            9017.0 / 3168.0,
            -355.0 / 33.0,
            46732.0 / 5247.0,
            49.0 / 176.0,
            -5103.0 / 18656.0,
        ],
    ],
    b: [
        35.0 / 384.0,
        0.0,
        500.0 / 1113.0,
        125.0 / 192.0,
        -2187.0 / 6784.0,
        11.0 / 84.0,
        0.0,
    ],
    e: [
        71.0 / 57600.0,
        0.0,
        -71.0 / 16695.0,
        71.0 / 1920.0,
        -17253.0 / 339200.0,
        22.0 / 525.0,
        -1.0 / 40.0,
    ],
    error_order: 5,
    dense: DenseKind::DormandPrince,
};

/// Shampine's weights for the solution at the step midpoint.
pub(crate) const DORMAND_PRINCE_MID: [f64; 7] = [
    6025192743.0 / 30085553152.0 / 2.0,
    0.0,
    51252292925.0 / 65400821598.0 / 2.0,
    -2691868925.0 / 45128329728.0 / 2.0,
    187940372067.0 / 1594534317056.0 / 2.0,
    -1776094331.0 / 19743644256.0 / 2.0,
    11237099.0 / 235043384.0 / 2.0,
];

pub(crate) static TSITOURAS: ButcherTableau = ButcherTableau {
    c: [0.0, 0.161, 0.327, 0.9, 0.9800255409045097, 1.0, 1.0],
    a: [
        &[],
        &[0.161],
        &[-0.008480655492356989, 0.335480655492357],
        &[2.897153057105493, -6.359448489975075, 4.3622954328695815],
        &[
            5.325864828439257,
            -11.748883564062828,
            7.4955393428898365,
            -0.09249506636175525,
        ],
        &[
            5.86145544294642,
            -12.92096931784711,
            8.159367898576159,
            -0.071584973281401,
            -0.028269050394068383,
        ],
    ],
    b: [
        0.09646076681806523,
        0.01,
        0.4798896504144996,
        1.379008574103742,
        -3.290069515436081,
        2.324710524099774,
        0.0,
    ],
    e: [
        -0.00178001105222577714,
        -0.0008164344596567469,
        0.007880878010261995,
        -0.1447110071732629,
        0.5823571654525552,
        -0.45808210592918697,
        1.0 / 66.0,
    ],
    error_order: 5,
    dense: DenseKind::Tsitouras,
};
