//! オブザーバとフィードフォワード制御のデフォルトパラメータ
//!
//! すべて固定小数点スケールの整数定数。モーターに合わせて
//! `ObserverConfig` / `FeedForwardConfig` 経由で上書きできます。

/// 電流スケール係数 F1（2のべき乗であること）（デフォルト値）
pub const DEFAULT_F1: i16 = 16384;

/// 逆起電力スケール係数 F2（2のべき乗であること）（デフォルト値）
pub const DEFAULT_F2: i16 = 8192;

/// オブザーバ係数 C1（固定子抵抗項）（デフォルト値）
pub const DEFAULT_C1: i16 = 1509;

/// オブザーバ係数 C2（電流誤差補正ゲイン K1）（デフォルト値）
pub const DEFAULT_C2: i16 = -4031;

/// オブザーバ係数 C3（逆起電力項）（デフォルト値）
pub const DEFAULT_C3: i16 = 268;

/// オブザーバ係数 C4（逆起電力補正ゲイン K2）（デフォルト値）
pub const DEFAULT_C4: i16 = 13107;

/// オブザーバ係数 C5（印加電圧項）（デフォルト値）
pub const DEFAULT_C5: i16 = 1462;

/// 機械速度平均ウィンドウ長（2のべき乗、最大64）（デフォルト値）
pub const DEFAULT_SPEED_BUFFER_SIZE_01HZ: u8 = 64;

/// 電気速度平均ウィンドウ長（2のべき乗、01Hzウィンドウ以下）（デフォルト値）
pub const DEFAULT_SPEED_BUFFER_SIZE_DPP: u8 = 16;

/// 速度分散ゲートの割合（128 = 100%）（デフォルト値）
pub const DEFAULT_VARIANCE_PERCENTAGE: u16 = 16;

/// 逆起電力整合チェックのモデルゲイン（64 = 1.0）（デフォルト値）
pub const DEFAULT_BEMF_CONSISTENCY_GAIN: u8 = 64;

/// 逆起電力整合チェックの許容割合（64 = 100%）（デフォルト値）
pub const DEFAULT_BEMF_CONSISTENCY_CHECK: u8 = 64;

/// 信頼性ヒステリシス：フォールト確定までの連続失敗回数（デフォルト値）
pub const DEFAULT_RELIABILITY_HYSTERESIS: u8 = 3;

/// 収束判定：バンド内に収まるべき連続回数（デフォルト値）
pub const DEFAULT_STARTUP_CONSIST_THRESHOLD: u8 = 2;

/// 収束判定バンド上限（1/16単位、17 = +6.25%）（デフォルト値）
pub const DEFAULT_SPEED_VALIDATION_BAND_H: u16 = 17;

/// 収束判定バンド下限（1/16単位、15 = -6.25%）（デフォルト値）
pub const DEFAULT_SPEED_VALIDATION_BAND_L: u16 = 15;

/// 始動検証に必要な最小機械速度 [0.1Hz]（デフォルト値）
pub const DEFAULT_MIN_STARTUP_VALID_SPEED_01HZ: u16 = 40;

/// アプリケーション最大機械速度 [0.1Hz]（整合チェックの適用上限）（デフォルト値）
pub const DEFAULT_MAX_APP_POSITIVE_MEC_SPEED_01HZ: u16 = 1000;

/// 速度フィードバックが有効とみなせる上限 [0.1Hz]（デフォルト値）
pub const DEFAULT_MAX_RELIABLE_MEC_SPEED_01HZ: u16 = 1150;

/// 速度フィードバックが有効とみなせる下限 [0.1Hz]（デフォルト値）
pub const DEFAULT_MIN_RELIABLE_MEC_SPEED_01HZ: u16 = 0;

/// フォールト確定までの許容速度エラー数（デフォルト値）
pub const DEFAULT_MAX_SPEED_ERRORS: u8 = 3;

/// オブザーバ実行周波数 [Hz]（PWM周期と同一）（デフォルト値）
pub const DEFAULT_MEASUREMENT_FREQUENCY: u16 = 16000;

/// 電気角/機械角比（極対数）（デフォルト値）
pub const DEFAULT_EL_TO_MEC_RATIO: u8 = 2;

/// PLL設定
pub mod pll {
    /// PLL比例ゲイン（デフォルト値）
    pub const DEFAULT_KP: i16 = 448;

    /// PLL積分ゲイン（デフォルト値）
    pub const DEFAULT_KI: i16 = 16;

    /// PLL比例ゲイン除数（2のべき乗であること）（デフォルト値）
    pub const DEFAULT_KP_DIVISOR: u16 = 16384;

    /// PLL積分ゲイン除数（2のべき乗であること）（デフォルト値）
    pub const DEFAULT_KI_DIVISOR: u16 = 32768;
}

/// フィードフォワード制御設定
pub mod feed_forward {
    /// q軸電圧式のd軸電流結合定数（インダクタンス項）（デフォルト値）
    pub const DEFAULT_CONSTANT_1D: i32 = 32246;

    /// d軸電圧式のq軸電流結合定数（インダクタンス項）（デフォルト値）
    pub const DEFAULT_CONSTANT_1Q: i32 = 41340;

    /// 速度比例項（永久磁石磁束）定数（デフォルト値）
    pub const DEFAULT_CONSTANT_2: i32 = 27563;

    /// PI出力ローパスフィルタ時定数（2のべき乗であること）（デフォルト値）
    pub const DEFAULT_VQD_LOW_PASS_FILTER_BW: i16 = 32;
}
